use std::collections::VecDeque;
use std::f64::consts::PI;

use ndarray::{Array1, ArrayView1};

/// Smoothing coefficient of a single-pole exponential filter.
pub fn exponential_coefficient(cutoff: f64, fs: f64) -> f64 {
    (-2.0 * PI * cutoff / fs).exp()
}

/// Single-pole low-pass, `y[n] = (1 - a)·x[n] + a·y[n-1]`.
///
/// Starts from the first input so a DC offset does not ring through the output.
pub fn exponential_lowpass(data: ArrayView1<f64>, cutoff: f64, fs: f64) -> Array1<f64> {
    let a = exponential_coefficient(cutoff, fs);
    let mut state = data.get(0).copied().unwrap_or_default();
    data.mapv(|x| {
        state = (1.0 - a) * x + a * state;
        state
    })
}

/// Single-pole high-pass: the input minus its own exponential low-pass.
pub fn exponential_highpass(data: ArrayView1<f64>, cutoff: f64, fs: f64) -> Array1<f64> {
    let baseline = exponential_lowpass(data, cutoff, fs);
    &data - &baseline
}

/// First difference; the first output is zero so the length is preserved.
pub fn derivative(data: ArrayView1<f64>) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(data.len());
    for i in 1..data.len() {
        out[i] = data[i] - data[i - 1];
    }
    out
}

/// Trailing moving-window integration using a running sum.
pub fn moving_window_integration(data: ArrayView1<f64>, window: usize) -> Array1<f64> {
    let window = window.max(1);
    let mut fifo = VecDeque::with_capacity(window + 1);
    let mut sum = 0.0;

    data.mapv(|x| {
        fifo.push_back(x);
        sum += x;
        if fifo.len() > window {
            if let Some(old) = fifo.pop_front() {
                sum -= old;
            }
        }
        sum / window as f64
    })
}
