use std::f64::consts::PI;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::{debug, info, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::ble::decoder::{encode_ecg_frame, encode_heart_rate, FrameKind};
use crate::ble::{FrameStream, Transport};
use crate::error::Result;

/// Samples per PMD frame at 130 Hz, as the strap sends them.
pub const SAMPLES_PER_FRAME: usize = 73;

/// (offset from the R peak in s, width in s, amplitude in µV) of the P, Q, R, S and T waves.
const WAVES: [(f64, f64, f64); 5] = [
    (-0.16, 0.025, 120.0),
    (-0.03, 0.010, -100.0),
    (0.0, 0.012, 1200.0),
    (0.03, 0.010, -250.0),
    (0.25, 0.050, 300.0),
];

/// Endless synthetic single-lead ECG.
pub struct SyntheticEcg {
    sample_rate: f64,
    period: f64,
    index: u64,
    noise: i32,
    rng: StdRng,
}

impl SyntheticEcg {
    pub fn new(sample_rate: u32, bpm: f64, seed: u64) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f64,
            period: 60.0 / bpm.clamp(20.0, 250.0),
            index: 0,
            noise: 20,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_samples(&mut self, count: usize) -> Vec<i32> {
        (0..count).map(|_| self.next_sample()).collect()
    }

    fn next_sample(&mut self) -> i32 {
        let t = self.index as f64 / self.sample_rate;
        self.index += 1;

        // R peak sits in the middle of each period
        let phase = t % self.period - self.period / 2.0;
        let mut value = 0.0;
        for beat in [-1.0, 0.0, 1.0] {
            let d = phase + beat * self.period;
            for (center, width, amplitude) in WAVES {
                value += amplitude * (-(d - center).powi(2) / (2.0 * width * width)).exp();
            }
        }
        // slow respiration drift
        value += 40.0 * (2.0 * PI * 0.25 * t).sin();

        let noise = if self.noise > 0 { self.rng.gen_range(-self.noise..=self.noise) } else { 0 };
        value.round() as i32 + noise
    }
}

pub fn synthetic_ecg(len: usize, sample_rate: u32, bpm: f64, seed: u64) -> Vec<i32> {
    SyntheticEcg::new(sample_rate, bpm, seed).next_samples(len)
}

/// Transport that plays a synthetic strap: PMD ECG frames at the real frame rate and one
/// heart-rate measurement per second.
pub struct MockTransport {
    sample_rate: u32,
    bpm: f64,
    seed: u64,
    battery: u8,
    task: Option<JoinHandle<()>>,
    log: Logger,
}

impl MockTransport {
    pub fn new(bpm: f64, log: Logger) -> Self {
        Self {
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            bpm,
            seed: rand::random(),
            battery: 87,
            task: None,
            log,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(SAMPLES_PER_FRAME as f64 / self.sample_rate.max(1) as f64)
    }
}

async fn generate(
    tx: mpsc::Sender<(FrameKind, Vec<u8>)>,
    mut ecg: SyntheticEcg,
    frame_interval: Duration,
    bpm: f64,
    log: Logger,
) {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let rr_raw = (60.0 / bpm * 1024.0).round() as u16;
    let frame_nanos = frame_interval.as_nanos() as u64;
    let mut sensor_timestamp: u64 = 0;
    let mut since_heart_rate = Duration::ZERO;

    loop {
        ticker.tick().await;

        let frame = encode_ecg_frame(sensor_timestamp, &ecg.next_samples(SAMPLES_PER_FRAME));
        sensor_timestamp += frame_nanos;
        if tx.send((FrameKind::Ecg, frame)).await.is_err() {
            break;
        }

        since_heart_rate += frame_interval;
        if since_heart_rate >= Duration::from_secs(1) {
            since_heart_rate -= Duration::from_secs(1);
            let report = encode_heart_rate(bpm.round().clamp(0.0, 255.0) as u8, &[rr_raw]);
            if tx.send((FrameKind::HeartRate, report)).await.is_err() {
                break;
            }
        }
    }
    debug!(log, "Mock stream receiver dropped");
}

impl Transport for MockTransport {
    fn start(&mut self) -> BoxFuture<'_, Result<FrameStream>> {
        Box::pin(async move {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            let (tx, rx) = mpsc::channel(64);
            let ecg = SyntheticEcg::new(self.sample_rate, self.bpm, self.seed);
            self.task = Some(tokio::spawn(generate(tx, ecg, self.frame_interval(), self.bpm, self.log.clone())));
            info!(self.log, "Mock stream started"; "bpm" => self.bpm);
            Ok(ReceiverStream::new(rx).boxed())
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = self.task.take() {
                task.abort();
                info!(self.log, "Mock stream stopped");
            }
            Ok(())
        })
    }

    fn battery_level(&mut self) -> BoxFuture<'_, Result<u8>> {
        Box::pin(async move { Ok(self.battery) })
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, Parameters};
    use crate::ble::decoder::{Decoded, PacketDecoder};

    #[test]
    fn synthetic_signal_is_reproducible() {
        assert_eq!(synthetic_ecg(500, 130, 70.0, 3), synthetic_ecg(500, 130, 70.0, 3));
        assert_ne!(synthetic_ecg(500, 130, 70.0, 3), synthetic_ecg(500, 130, 70.0, 4));
    }

    #[test]
    fn estimator_recovers_the_synthetic_rate() {
        let analysis = Analysis::new(Parameters::for_sample_rate(130, 5), crate::log::silent());
        for bpm in [50.0, 72.0, 120.0] {
            let signal = synthetic_ecg(10 * 130, 130, bpm, 11);
            let estimate = analysis.estimate_bpm(&signal).expect("rate");
            assert!((estimate - bpm).abs() < 3.0, "{bpm} -> {estimate}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mock_stream_emits_decodable_frames() {
        let mut transport = MockTransport::new(60.0, crate::log::silent()).with_seed(1);
        let mut stream = transport.start().await.unwrap();
        let decoder = PacketDecoder::default();

        let mut samples = 0;
        let mut reports = 0;
        while reports == 0 {
            let (kind, data) = stream.next().await.unwrap();
            match decoder.decode(kind, &data) {
                Decoded::Ecg(frame) => samples += frame.samples.len(),
                Decoded::HeartRate(report) => {
                    assert_eq!(report.bpm, 60);
                    assert_eq!(report.rr_intervals_ms, vec![1000]);
                    reports += 1;
                }
                Decoded::Empty => panic!("mock produced an undecodable frame"),
            }
        }
        assert_eq!(samples % SAMPLES_PER_FRAME, 0);
        assert!(samples >= 130);

        transport.stop().await.unwrap();
        // the stream ends once the generator is gone
        assert!(stream.count().await <= 2);
    }
}
