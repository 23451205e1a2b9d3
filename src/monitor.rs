use chrono::{DateTime, Duration, Local};
use slog::{debug, info, o, warn, Logger};

use crate::analysis::{Analysis, FilterBank, HeartRateInput};
use crate::ble::{Decoded, FrameKind, HeartRateReport, PacketDecoder};
use crate::config::{MonitorConfig, RecordingConfig};
use crate::error::{CoreError, Result};
use crate::render::canvas::Canvas;
use crate::render::{draw_record, Geometry, Layout, SweepRenderer, TickOutcome, TickTime};
use crate::storage::recorder::{Recorder, SnapshotSink};
use crate::storage::snapshot::{EcgRecord, Snapshot};
use crate::storage::SampleBuffers;

/// What the view is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum DisplayMode {
    /// The sweep follows the incoming stream.
    Live,
    /// Frozen on the last completed sweep.
    Last,
    /// An imported record.
    Loaded,
}

/// Things the host should hear about that happened as a side effect of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status(String),
    SnapshotSaved(String),
}

/// Single-writer owner of the whole pipeline: decode, filter, buffer fan-out, rendering,
/// estimation and recording. Callers serialize access to it.
pub struct Monitor {
    config: MonitorConfig,
    decoder: PacketDecoder,
    filters: FilterBank,
    buffers: SampleBuffers,
    renderer: SweepRenderer,
    recorder: Recorder,
    mode: DisplayMode,
    loaded: Option<EcgRecord>,
    last_report: Option<HeartRateReport>,
    streaming: bool,
    /// A static view needs repainting on the next tick.
    stale: bool,
    notices: Vec<Notice>,
    log: Logger,
}

impl Monitor {
    pub fn new(config: MonitorConfig, log: Logger) -> Self {
        let config = config.sanitized();
        Self {
            decoder: PacketDecoder::new(config.calibration),
            filters: FilterBank::new(config.filter_mode),
            buffers: SampleBuffers::new(config.samples_per_sweep()),
            renderer: SweepRenderer::new(config.clone(), Layout::default(), log.new(o!("part" => "renderer"))),
            recorder: Recorder::new(log.new(o!("part" => "recorder"))),
            mode: DisplayMode::Live,
            loaded: None,
            last_report: None,
            streaming: false,
            stale: false,
            notices: Vec::new(),
            config,
            log,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MonitorConfig) {
        let config = config.sanitized();
        if config == self.config {
            return;
        }
        if config.filter_mode != self.config.filter_mode {
            info!(self.log, "Filter changed"; "from" => self.config.filter_mode.as_str(), "to" => config.filter_mode.as_str());
            self.filters.set_mode(config.filter_mode);
        }
        if config.affects_display(&self.config) {
            self.stale = true;
        }
        self.decoder.set_calibration(config.calibration);
        self.buffers.set_capacity(config.samples_per_sweep());
        self.renderer.set_config(config.clone());
        info!(self.log, "Configuration changed";
            "sweep_s" => config.sweep_seconds,
            "rows" => config.rows,
            "uv_per_div" => config.uv_per_div,
            "average_s" => config.bpm_average_seconds);
        self.config = config;
    }

    pub fn resize(&mut self, layout: Layout) {
        if layout != self.renderer.layout() {
            self.renderer.resize(layout);
            self.stale = true;
        }
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn buffers(&self) -> &SampleBuffers {
        &self.buffers
    }

    /// Starts a fresh session: nothing from a previous stream survives, including filter
    /// state.
    pub fn start_stream(&mut self) {
        self.buffers.clear();
        self.buffers.set_recording(self.recorder.wants_ecg());
        self.filters.reset();
        self.renderer.invalidate();
        self.mode = DisplayMode::Live;
        self.loaded = None;
        self.last_report = None;
        self.streaming = true;
        info!(self.log, "Stream started"; "sample_rate" => self.config.sample_rate);
    }

    pub fn stop_stream(&mut self) {
        if self.streaming {
            info!(self.log, "Stream stopped"; "buffered" => self.buffers.rolling_len());
        }
        self.streaming = false;
    }

    /// Decodes one transport frame. ECG samples are filtered and fanned out only while a
    /// stream is running; heart-rate reports are handed back to the caller.
    pub fn handle_frame(&mut self, kind: FrameKind, data: &[u8]) -> Option<HeartRateReport> {
        match self.decoder.decode(kind, data) {
            Decoded::Ecg(frame) => {
                if self.streaming {
                    let filtered = self.filters.process_all(&frame.samples);
                    self.buffers.append(&filtered);
                }
                None
            }
            Decoded::HeartRate(report) => {
                self.recorder.record_heart_rate(report.bpm);
                self.last_report = Some(report.clone());
                Some(report)
            }
            Decoded::Empty => {
                debug!(self.log, "Dropped frame"; "kind" => ?kind, "len" => data.len());
                None
            }
        }
    }

    pub fn last_report(&self) -> Option<&HeartRateReport> {
        self.last_report.as_ref()
    }

    /// Advances the display by one animation frame.
    pub fn render_tick(&mut self, canvas: &mut dyn Canvas, time: TickTime) -> TickOutcome {
        if self.mode != DisplayMode::Live {
            // nobody draws these; the rolling buffer still has them
            self.buffers.discard_pending();
            if self.stale {
                self.redraw_static(canvas);
            }
            return TickOutcome::default();
        }
        self.stale = false;

        let recording = self.recorder.wants_ecg();
        let outcome = self.renderer.tick(&mut self.buffers, canvas, time, recording);
        for snapshot in &outcome.autosave {
            self.save(snapshot);
        }
        if recording && !outcome.completed.is_empty() {
            // the sweep snapshots already cover these samples
            self.buffers.clear_autosave();
        }
        outcome
    }

    /// The estimator and a copy of the rolling buffer, so the estimate can run after the
    /// monitor is released. `None` until two seconds are buffered.
    pub fn estimate_input(&self) -> Option<(Analysis, Vec<i32>)> {
        let input = HeartRateInput {
            sample_rate: self.config.sample_rate,
            average_seconds: self.config.bpm_average_seconds,
        };
        let params = input.parameters();
        if self.buffers.rolling_len() < params.min_samples() {
            return None;
        }
        Some((Analysis::new(params, self.log.clone()), self.buffers.rolling_snapshot()))
    }

    pub fn show_live(&mut self) {
        self.mode = DisplayMode::Live;
        self.loaded = None;
        self.buffers.clear_live();
        self.renderer.invalidate();
        info!(self.log, "Showing live signal");
    }

    pub fn show_last(&mut self, canvas: &mut dyn Canvas) {
        self.mode = DisplayMode::Last;
        self.loaded = None;
        info!(self.log, "Showing last sweep"; "available" => self.buffers.last_sweep().is_some());
        self.redraw_static(canvas);
    }

    /// Parses an exported record and shows it.
    pub fn load_record(&mut self, json: &str, canvas: &mut dyn Canvas) -> Result<()> {
        let record = EcgRecord::from_json(json)?;
        info!(self.log, "Record loaded";
            "timestamp" => %record.timestamp,
            "samples" => record.samples.len(),
            "filter" => record.filter_mode.as_str());
        self.loaded = Some(record);
        self.mode = DisplayMode::Loaded;
        self.redraw_static(canvas);
        Ok(())
    }

    pub fn loaded_record(&self) -> Option<&EcgRecord> {
        self.loaded.as_ref()
    }

    /// The strip currently on display: the loaded record, else the last completed sweep,
    /// else whatever the rolling buffer holds.
    pub fn export_current(&self, now: DateTime<Local>) -> Result<EcgRecord> {
        if let (DisplayMode::Loaded, Some(record)) = (self.mode, &self.loaded) {
            return Ok(record.clone());
        }
        let snapshot = match self.buffers.last_sweep() {
            Some(snapshot) => snapshot.clone(),
            None => {
                let samples = self.buffers.rolling_snapshot();
                Snapshot::new(now - self.span(samples.len()), samples)
            }
        };
        if snapshot.samples.is_empty() {
            return Err(CoreError::NothingToExport);
        }
        Ok(EcgRecord::from_snapshot(&snapshot, &self.config))
    }

    /// Paints the static view of the current mode in one go.
    pub fn redraw_static(&mut self, canvas: &mut dyn Canvas) {
        self.stale = false;
        let (config, samples, started_at) = match (self.mode, &self.loaded) {
            (DisplayMode::Loaded, Some(record)) => {
                let config = MonitorConfig {
                    uv_per_div: record.uv_per_div,
                    sample_rate: record.sample_rate,
                    filter_mode: record.filter_mode,
                    ..self.config.clone()
                };
                (config, record.samples.clone(), Some(record.timestamp))
            }
            (DisplayMode::Live, _) => return,
            _ => match self.buffers.last_sweep() {
                Some(snapshot) => (self.config.clone(), snapshot.samples.clone(), Some(snapshot.started_at)),
                None => (self.config.clone(), self.buffers.rolling_snapshot(), None),
            },
        };

        let Some(geometry) = Geometry::new(&config, self.renderer.layout()) else {
            return;
        };
        draw_record(canvas, &geometry, &samples, started_at.as_ref(), config.filter_mode.label());
    }

    pub fn start_recording(&mut self, sink: Box<dyn SnapshotSink>, config: RecordingConfig, time: TickTime) {
        self.recorder.start(sink, config, time.instant);
        self.buffers.set_recording(self.recorder.wants_ecg());
    }

    pub fn stop_recording(&mut self) {
        self.recorder.stop();
        self.buffers.set_recording(false);
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn log_bpm_if_due(&mut self, time: TickTime) -> Option<u32> {
        let result = self.recorder.log_bpm_if_due(time.instant, time.wall);
        match result {
            Ok(logged) => logged,
            Err(err) => {
                self.storage_failed(err);
                None
            }
        }
    }

    /// While the view is frozen or has no size yet nothing completes sweeps, so recording
    /// falls back to cutting sweep-sized chunks from the autosave buffer. Returns how many
    /// were saved.
    pub fn poll_headless_autosave(&mut self, now: DateTime<Local>) -> usize {
        let sweeping = self.mode == DisplayMode::Live && self.renderer.can_draw();
        if sweeping || !self.recorder.wants_ecg() {
            return 0;
        }
        let chunk = self.config.samples_per_sweep();
        let mut chunks = Vec::new();
        while let Some(samples) = self.buffers.take_autosave_chunk(chunk) {
            chunks.push(samples);
        }

        let count = chunks.len();
        let mut saved = 0;
        for (index, samples) in chunks.into_iter().enumerate() {
            let started_at = now - self.span(chunk * (count - index));
            if self.save(&Snapshot::new(started_at, samples)) {
                saved += 1;
            }
        }
        if saved > 0 {
            debug!(self.log, "Headless autosave"; "snapshots" => saved);
        }
        saved
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn save(&mut self, snapshot: &Snapshot) -> bool {
        if !self.recorder.wants_ecg() {
            return false;
        }
        let record = EcgRecord::from_snapshot(snapshot, &self.config);
        match self.recorder.save_snapshot(&record) {
            Ok(()) => {
                self.notices.push(Notice::SnapshotSaved(record.file_name()));
                true
            }
            Err(err) => {
                self.storage_failed(err);
                false
            }
        }
    }

    fn storage_failed(&mut self, err: CoreError) {
        if err.is_permission_lost() {
            self.buffers.set_recording(false);
            self.notices
                .push(Notice::Status("Recording stopped: storage permission was revoked".to_string()));
        } else {
            warn!(self.log, "Storage failure"; "error" => %err);
            self.notices.push(Notice::Status(format!("Could not save recording: {err}")));
        }
    }

    fn span(&self, samples: usize) -> Duration {
        Duration::milliseconds(samples as i64 * 1000 / self.config.sample_rate.max(1) as i64)
    }
}
