pub mod bank;
pub mod ecg;
mod filter;
pub mod offline;
#[cfg(test)]
mod plot;

pub use bank::FilterBank;
pub use ecg::{Analysis, IntervalHistory, Parameters, Results};

/// Sample rate and averaging window handed to the estimator with each snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateInput {
    pub sample_rate: u32,
    pub average_seconds: u32,
}

impl HeartRateInput {
    pub fn parameters(&self) -> Parameters {
        Parameters::for_sample_rate(self.sample_rate, self.average_seconds)
    }
}
