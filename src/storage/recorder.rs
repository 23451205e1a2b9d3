use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use slog::{debug, error, info, warn, Logger};

use crate::config::RecordingConfig;
use crate::error::Result;
use crate::storage::bpm_log::{append_bpm, average_bpm, BPM_LOG_FILE_NAME};
use crate::storage::snapshot::EcgRecord;

/// Where recordings end up.
pub trait SnapshotSink: Send + Sync {
    fn save_snapshot(&mut self, record: &EcgRecord) -> Result<()>;
    fn log_bpm(&mut self, timestamp: &DateTime<Local>, bpm: u32) -> Result<()>;
}

/// Writes one JSON file per snapshot and appends BPM lines to a CSV log, all in one
/// directory.
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }
}

impl SnapshotSink for DirectorySink {
    fn save_snapshot(&mut self, record: &EcgRecord) -> Result<()> {
        let path = self.directory.join(record.file_name());
        fs::write(path, record.to_json()?)?;
        Ok(())
    }

    fn log_bpm(&mut self, timestamp: &DateTime<Local>, bpm: u32) -> Result<()> {
        append_bpm(&self.directory.join(BPM_LOG_FILE_NAME), timestamp, bpm)
    }
}

pub struct Recorder {
    active: bool,
    config: RecordingConfig,
    sink: Option<Box<dyn SnapshotSink>>,
    hr_samples: Vec<u16>,
    last_bpm_log: Option<Instant>,
    log: Logger,
}

impl Recorder {
    pub fn new(log: Logger) -> Self {
        Self {
            active: false,
            config: RecordingConfig::default(),
            sink: None,
            hr_samples: Vec::new(),
            last_bpm_log: None,
            log,
        }
    }

    pub fn start(&mut self, sink: Box<dyn SnapshotSink>, config: RecordingConfig, now: Instant) {
        self.config = config.normalized();
        self.sink = Some(sink);
        self.active = true;
        self.hr_samples.clear();
        self.last_bpm_log = Some(now);
        info!(self.log, "Recording started";
            "save_ecg" => self.config.save_ecg,
            "save_bpm" => self.config.save_bpm,
            "bpm_interval_s" => self.config.bpm_log_interval_seconds);
    }

    pub fn stop(&mut self) {
        if self.active {
            info!(self.log, "Recording stopped");
        }
        self.active = false;
        self.sink = None;
        self.hr_samples.clear();
        self.last_bpm_log = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn wants_ecg(&self) -> bool {
        self.active && self.config.save_ecg
    }

    pub fn wants_bpm(&self) -> bool {
        self.active && self.config.save_bpm
    }

    pub fn record_heart_rate(&mut self, bpm: u16) {
        if self.wants_bpm() {
            self.hr_samples.push(bpm);
        }
    }

    pub fn save_snapshot(&mut self, record: &EcgRecord) -> Result<()> {
        if !self.wants_ecg() || record.samples.is_empty() {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let result = sink.save_snapshot(record);
        if result.is_ok() {
            debug!(self.log, "Snapshot saved"; "file" => record.file_name(), "samples" => record.samples.len());
        }
        self.check(result)
    }

    /// Writes the average of the heart-rate reports gathered since the last line once the
    /// logging interval has elapsed. An interval without reports writes nothing.
    pub fn log_bpm_if_due(&mut self, now: Instant, wall: DateTime<Local>) -> Result<Option<u32>> {
        if !self.wants_bpm() {
            return Ok(None);
        }
        let interval = Duration::from_secs(self.config.bpm_log_interval_seconds as u64);
        let due = self
            .last_bpm_log
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if !due {
            return Ok(None);
        }
        self.last_bpm_log = Some(now);

        let Some(bpm) = average_bpm(&self.hr_samples) else {
            debug!(self.log, "No heart-rate reports in interval");
            return Ok(None);
        };
        let count = self.hr_samples.len();
        self.hr_samples.clear();

        let Some(sink) = self.sink.as_mut() else {
            return Ok(None);
        };
        let result = sink.log_bpm(&wall, bpm);
        if result.is_ok() {
            debug!(self.log, "BPM logged"; "bpm" => bpm, "reports" => count);
        }
        self.check(result).map(|_| Some(bpm))
    }

    fn check(&mut self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            if err.is_permission_lost() {
                error!(self.log, "Write permission lost, recording disabled"; "error" => %err);
                self.stop();
            } else {
                warn!(self.log, "Recording write failed"; "error" => %err);
            }
        }
        result
    }
}
