use std::collections::VecDeque;

use biquad::{Biquad, Coefficients, DirectForm1};

use crate::config::FilterMode;

// Butterworth high-pass sections designed for fs = 130 Hz.
const BUTTER2: Coefficients<f64> = Coefficients {
    b0: 0.945350,
    b1: -1.890509,
    b2: 0.945350,
    a1: -1.889033,
    a2: 0.894874,
};

const BUTTER4_STAGES: [Coefficients<f64>; 2] = [
    Coefficients {
        b0: 0.989283,
        b1: -1.978566,
        b2: 0.989283,
        a1: -1.977786,
        a2: 0.978783,
    },
    Coefficients {
        b0: 1.000000,
        b1: -2.000000,
        b2: 1.000000,
        a1: -1.997955,
        a2: 0.997956,
    },
];

const MOVING_AVERAGE_LEN: usize = 5;

/// 11 points, cubic fit, normalised by 429.
const SAVITZKY_GOLAY: [f64; 11] = [-36.0, 9.0, 44.0, 69.0, 84.0, 89.0, 84.0, 69.0, 44.0, 9.0, -36.0];
const SAVITZKY_GOLAY_NORM: f64 = 429.0;

/// Hamming-windowed linear-phase low-pass.
const FIR_TAPS: [f64; 19] = [
    -0.006536, -0.011789, -0.010562, 0.003759, 0.032708, 0.073068, 0.118046, 0.158111, 0.184487,
    0.191429, 0.184487, 0.158111, 0.118046, 0.073068, 0.032708, 0.003759, -0.010562, -0.011789,
    -0.006536,
];

struct FirState {
    buffer: [f64; FIR_TAPS.len()],
    index: usize,
    primed: bool,
}

impl FirState {
    fn new() -> Self {
        Self {
            buffer: [0.0; FIR_TAPS.len()],
            index: 0,
            primed: false,
        }
    }

    fn run(&mut self, x: f64) -> f64 {
        if !self.primed {
            self.buffer = [x; FIR_TAPS.len()];
            self.primed = true;
        }
        self.buffer[self.index] = x;

        // newest sample meets the first tap
        let len = FIR_TAPS.len();
        let mut j = self.index;
        let mut y = 0.0;
        for tap in FIR_TAPS.iter() {
            y += tap * self.buffer[j];
            j = (j + len - 1) % len;
        }

        self.index = (self.index + 1) % len;
        y
    }
}

/// Per-sample ECG filters. Exactly one kind is active; every kind keeps its own state so
/// that switching can wipe all of them at once.
pub struct FilterBank {
    mode: FilterMode,
    butter2: DirectForm1<f64>,
    butter4: [DirectForm1<f64>; 2],
    moving_average: VecDeque<f64>,
    savitzky: VecDeque<f64>,
    fir: FirState,
}

impl FilterBank {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            butter2: DirectForm1::<f64>::new(BUTTER2),
            butter4: [
                DirectForm1::<f64>::new(BUTTER4_STAGES[0]),
                DirectForm1::<f64>::new(BUTTER4_STAGES[1]),
            ],
            moving_average: VecDeque::with_capacity(MOVING_AVERAGE_LEN + 1),
            savitzky: VecDeque::with_capacity(SAVITZKY_GOLAY.len() + 1),
            fir: FirState::new(),
        }
    }

    /// Activates `mode` and clears the state of every filter kind.
    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
        self.reset();
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.mode);
    }

    pub fn process(&mut self, sample: i32) -> i32 {
        let x = sample as f64;
        let y = match self.mode {
            FilterMode::None => return sample,
            FilterMode::Butterworth2 => self.butter2.run(x),
            FilterMode::Butterworth4 => {
                let stage = self.butter4[0].run(x);
                self.butter4[1].run(stage)
            }
            FilterMode::MovingAverage => self.moving_average(x),
            FilterMode::SavitzkyGolay => self.savitzky_golay(x),
            FilterMode::FirLowPass => self.fir.run(x),
        };
        y.round() as i32
    }

    pub fn process_all(&mut self, samples: &[i32]) -> Vec<i32> {
        samples.iter().map(|&s| self.process(s)).collect()
    }

    fn moving_average(&mut self, x: f64) -> f64 {
        self.moving_average.push_back(x);
        if self.moving_average.len() > MOVING_AVERAGE_LEN {
            self.moving_average.pop_front();
        }
        self.moving_average.iter().sum::<f64>() / self.moving_average.len() as f64
    }

    fn savitzky_golay(&mut self, x: f64) -> f64 {
        self.savitzky.push_back(x);
        if self.savitzky.len() < SAVITZKY_GOLAY.len() {
            return x;
        }
        if self.savitzky.len() > SAVITZKY_GOLAY.len() {
            self.savitzky.pop_front();
        }
        self.savitzky
            .iter()
            .zip(SAVITZKY_GOLAY.iter())
            .map(|(sample, c)| sample * c)
            .sum::<f64>()
            / SAVITZKY_GOLAY_NORM
    }
}

impl Default for FilterBank {
    fn default() -> Self {
        Self::new(FilterMode::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(len: usize, level: i32) -> Vec<i32> {
        vec![level; len]
    }

    #[test]
    fn none_passes_through() {
        let mut bank = FilterBank::default();
        assert_eq!(bank.process_all(&[1, -5, 800_000]), vec![1, -5, 800_000]);
    }

    #[test]
    fn moving_average_uses_five_samples() {
        let mut bank = FilterBank::new(FilterMode::MovingAverage);
        let out = bank.process_all(&[10, 20, 30, 40, 50, 60]);
        assert_eq!(out, vec![10, 15, 20, 25, 30, 40]);
    }

    #[test]
    fn savitzky_golay_passes_input_during_fill() {
        let mut bank = FilterBank::new(FilterMode::SavitzkyGolay);
        let ramp: Vec<i32> = (0..10).map(|i| i * 7).collect();
        assert_eq!(bank.process_all(&ramp), ramp);
        // once full, a cubic fit reproduces a line at the window centre
        let out = bank.process_all(&[70, 77, 84]);
        assert_eq!(out, vec![35, 42, 49]);
    }

    #[test]
    fn fir_starts_without_transient() {
        let mut bank = FilterBank::new(FilterMode::FirLowPass);
        let gain: f64 = FIR_TAPS.iter().sum();
        let expected = (1000.0 * gain).round() as i32;
        for y in bank.process_all(&step(40, 1000)) {
            assert_eq!(y, expected);
        }
    }

    #[test]
    fn butterworth_attenuates_dc() {
        for mode in [FilterMode::Butterworth2, FilterMode::Butterworth4] {
            let mut bank = FilterBank::new(mode);
            let out = bank.process_all(&step(3000, 500));
            assert!(out[0].abs() > 100, "{mode}: step should pass at first");
            // rounded coefficients leave a few percent of DC through
            assert!(out.last().copied().unwrap_or_default().abs() <= 25, "{mode}: {:?}", out.last());
        }
    }

    #[test]
    fn switching_mode_forgets_history() {
        let mut bank = FilterBank::new(FilterMode::MovingAverage);
        bank.process_all(&step(10, 10_000));
        bank.set_mode(FilterMode::MovingAverage);
        assert_eq!(bank.process(100), 100);

        let mut bank = FilterBank::new(FilterMode::Butterworth2);
        bank.process_all(&step(10, 10_000));
        bank.set_mode(FilterMode::SavitzkyGolay);
        bank.process_all(&step(5, 0));
        bank.set_mode(FilterMode::Butterworth2);
        let mut fresh = FilterBank::new(FilterMode::Butterworth2);
        assert_eq!(bank.process_all(&step(20, 300)), fresh.process_all(&step(20, 300)));

        let mut bank = FilterBank::new(FilterMode::FirLowPass);
        bank.process_all(&step(5, -4000));
        bank.set_mode(FilterMode::FirLowPass);
        let mut fresh = FilterBank::new(FilterMode::FirLowPass);
        assert_eq!(bank.process_all(&step(19, 250)), fresh.process_all(&step(19, 250)));
    }
}
