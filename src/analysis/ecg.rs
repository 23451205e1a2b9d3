use std::collections::VecDeque;
use std::error::Error;

use find_peaks::PeakFinder;
use ndarray::{s, Array1, ArrayView1};
use ndarray_stats::QuantileExt;
use slog::{warn, Logger};

use crate::analysis::filter::{derivative, exponential_highpass, exponential_lowpass, moving_window_integration};

pub struct Parameters {
    pub sampling_frequency: f64,
    pub lowpass_cutoff: f64,
    pub highpass_cutoff: f64,
    /// Moving-window integration length in samples (about 150 ms).
    pub integration_window: usize,
    /// Minimum spacing between two accepted beats in samples (about 200 ms).
    pub refractory: usize,
    /// Seconds of integrated signal used to seed the peak levels.
    pub learning_seconds: f64,
    /// Absolute plausibility band in bpm.
    pub hr_range: (f64, f64),
    /// Accepted interval as a fraction of the validated history mean.
    pub interval_tolerance: (f64, f64),
    pub history_len: usize,
    /// Trailing seconds averaged into the reported rate; 0 averages the whole history.
    pub average_seconds: f64,
}

impl Parameters {
    pub fn for_sample_rate(sample_rate: u32, average_seconds: u32) -> Self {
        let fs = sample_rate.max(1) as f64;
        Self {
            sampling_frequency: fs,
            lowpass_cutoff: 15.0,
            highpass_cutoff: 5.0,
            integration_window: ((0.15 * fs).round() as usize).max(1),
            refractory: ((0.2 * fs).round() as usize).max(1),
            learning_seconds: 2.0,
            hr_range: (27.0, 220.0),
            interval_tolerance: (0.6, 1.6),
            history_len: 8,
            average_seconds: average_seconds as f64,
        }
    }

    /// Fewest samples the estimator will look at.
    pub fn min_samples(&self) -> usize {
        (2.0 * self.sampling_frequency).ceil() as usize
    }

    fn interval_bounds(&self) -> (f64, f64) {
        let fs = self.sampling_frequency;
        let (min_bpm, max_bpm) = self.hr_range;
        (60.0 * fs / max_bpm, 60.0 * fs / min_bpm)
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::for_sample_rate(crate::config::DEFAULT_SAMPLE_RATE, 5)
    }
}

/// Bounded history of inter-beat intervals, in samples, that passed the plausibility gate.
#[derive(Debug, Clone, Default)]
pub struct IntervalHistory {
    intervals: VecDeque<usize>,
    max_len: usize,
}

impl IntervalHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(max_len + 1),
            max_len: max_len.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        Some(self.intervals.iter().sum::<usize>() as f64 / self.intervals.len() as f64)
    }

    /// Mean of the newest intervals that together cover at least `span` samples.
    /// A `span` of zero or more than the history holds averages everything.
    pub fn trailing_mean(&self, span: f64) -> Option<f64> {
        if span <= 0.0 {
            return self.mean();
        }
        let mut covered = 0.0;
        let mut count = 0;
        for &interval in self.intervals.iter().rev() {
            covered += interval as f64;
            count += 1;
            if covered >= span {
                break;
            }
        }
        if count == 0 {
            return None;
        }
        Some(covered / count as f64)
    }

    pub fn push(&mut self, interval: usize) {
        self.intervals.push_back(interval);
        while self.intervals.len() > self.max_len {
            self.intervals.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.intervals.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Results {
    /// Accepted beat locations, sample indices into the analysed window.
    pub beats: Vec<usize>,
    pub history: IntervalHistory,
    pub bpm: Option<f64>,
}

/// Adaptive signal and noise levels of the dual-threshold peak picker.
struct Thresholds {
    signal_peak: f64,
    noise_peak: f64,
}

impl Thresholds {
    fn learn(integrated: ArrayView1<f64>) -> Self {
        let max = integrated.max().map(|v| *v).unwrap_or_default();
        let mean = integrated.mean().unwrap_or_default();
        Self {
            signal_peak: max / 3.0,
            noise_peak: mean / 2.0,
        }
    }

    fn signal(&self) -> f64 {
        self.noise_peak + 0.25 * (self.signal_peak - self.noise_peak)
    }

    fn noise(&self) -> f64 {
        0.5 * self.signal()
    }

    fn update_signal(&mut self, peak: f64) {
        self.signal_peak = 0.125 * peak + 0.875 * self.signal_peak;
    }

    fn update_noise(&mut self, peak: f64) {
        self.noise_peak = 0.125 * peak + 0.875 * self.noise_peak;
    }
}

pub struct Analysis {
    pub params: Parameters,

    pub plotter: Option<Box<dyn Fn(
        ArrayView1<f64>,
        &str,
        &str,
        Option<Vec<usize>>
    ) -> Result<(), Box<dyn Error>> + Send + Sync>>,

    log: Logger,
}

impl Analysis {
    pub fn new(params: Parameters, log: Logger) -> Self {
        Self {
            params,
            plotter: None,
            log,
        }
    }

    pub fn with_plotter<F>(mut self, plotter: F) -> Self
    where
        F: Fn(ArrayView1<f64>, &str, &str, Option<Vec<usize>>) -> Result<(), Box<dyn Error>> + Send + Sync + 'static,
    {
        self.plotter = Some(Box::new(plotter));
        self
    }

    /// Heart rate of a copied window of filtered samples, or `None` when the window is
    /// too short or holds too few plausible beats.
    pub fn estimate_bpm(&self, samples: &[i32]) -> Option<f64> {
        self.analyze(samples).bpm
    }

    pub fn analyze(&self, samples: &[i32]) -> Results {
        let mut history = IntervalHistory::new(self.params.history_len);
        if samples.len() < self.params.min_samples() {
            return Results { history, ..Default::default() };
        }

        let signal: Array1<f64> = samples.iter().map(|&s| s as f64).collect();
        self.plot_signal(signal.view(), "Raw Signal", "signal_raw.png", None);

        let filtered = self.filter(signal.view());
        self.plot_signal(filtered.view(), "Filtered Signal", "signal_filt.png", None);

        let squared = derivative(filtered.view()).mapv(|d| d * d);
        self.plot_signal(squared.view(), "Squared Derivative", "signal_squared.png", None);

        let integrated = moving_window_integration(squared.view(), self.params.integration_window);
        self.plot_signal(integrated.view(), "Integrated Signal", "signal_integrated.png", None);

        let beats = self.detect_beats(integrated.view());
        self.plot_signal(integrated.view(), "Beats", "signal_beats.png", Some(beats.clone()));

        if beats.len() < 2 {
            return Results { beats, history, bpm: None };
        }

        self.validate_intervals(&beats, &mut history);

        let span = self.params.average_seconds * self.params.sampling_frequency;
        let bpm = history
            .trailing_mean(span)
            .filter(|&mean| mean > 0.0)
            .map(|mean| 60.0 * self.params.sampling_frequency / mean);

        Results { beats, history, bpm }
    }

    fn filter(&self, signal: ArrayView1<f64>) -> Array1<f64> {
        let fs = self.params.sampling_frequency;
        let lowpassed = exponential_lowpass(signal, self.params.lowpass_cutoff, fs);
        exponential_highpass(lowpassed.view(), self.params.highpass_cutoff, fs)
    }

    fn find_peaks(&self, integrated: &[f64]) -> Vec<usize> {
        let peaks = PeakFinder::new(integrated)
            .with_min_distance(self.params.refractory)
            .find_peaks();

        let mut peaks: Vec<usize> = peaks.iter().map(|p| p.position.start).collect();
        peaks.sort_unstable();
        peaks
    }

    fn detect_beats(&self, integrated: ArrayView1<f64>) -> Vec<usize> {
        let learning = ((self.params.learning_seconds * self.params.sampling_frequency) as usize)
            .min(integrated.len());
        let mut thresholds = Thresholds::learn(integrated.slice(s![..learning]));

        let values = integrated.to_vec();
        let mut beats: Vec<usize> = Vec::new();

        for position in self.find_peaks(&values) {
            let peak = values[position];
            let clear_of_last = beats
                .last()
                .map_or(true, |&last| position - last >= self.params.refractory);

            if peak > thresholds.signal() && clear_of_last {
                beats.push(position);
                thresholds.update_signal(peak);
            } else if peak > thresholds.noise() {
                thresholds.update_noise(peak);
            }
        }
        beats
    }

    fn validate_intervals(&self, beats: &[usize], history: &mut IntervalHistory) {
        let (min_interval, max_interval) = self.params.interval_bounds();
        let (low, high) = self.params.interval_tolerance;

        for interval in beats.windows(2).map(|w| w[1] - w[0]) {
            let samples = interval as f64;
            if samples < min_interval || samples > max_interval {
                continue;
            }
            if let Some(mean) = history.mean() {
                if samples < low * mean || samples > high * mean {
                    continue;
                }
            }
            history.push(interval);
        }
    }

    fn plot_signal(&self, signal: ArrayView1<f64>, title: &str, filename: &str, points: Option<Vec<usize>>) {
        if let Some(f) = &self.plotter {
            if let Err(err) = f(signal, title, filename, points) {
                warn!(self.log, "Plotting stage failed"; "stage" => title, "error" => %err);
            }
        }
    }
}
