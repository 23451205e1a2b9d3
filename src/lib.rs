use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slog::{info, o, warn, Logger};
use tokio::runtime::Runtime;
use tokio::sync::RwLock;

pub mod analysis;
pub mod ble;
pub mod config;
pub mod error;
pub mod log;
pub mod monitor;
pub mod render;
pub mod session;
pub mod storage;

pub use ble::{FrameKind, HeartRateReport};
pub use config::{Calibration, FilterMode, MonitorConfig, RecordingConfig};
pub use error::CoreError;
pub use monitor::{DisplayMode, Monitor};
pub use render::canvas::{DrawOp, Point, TextAlign};
pub use render::Layout;

use ble::mock::MockTransport;
use ble::{PolarH10, Transport};
use render::canvas::DisplayList;
use session::{forward, tick_time, Session, SharedMonitor};
use storage::recorder::DirectorySink;

uniffi::setup_scaffolding!();

/// Host-side receiver of everything the core pushes out.
#[uniffi::export(callback_interface)]
pub trait CoreDelegate: Send + Sync {
    /// Estimate from the ECG itself; `None` while there is not enough signal.
    fn heart_rate_changed(&self, bpm: Option<u32>);
    /// Heart rate and RR intervals as the strap reports them.
    fn device_heart_rate(&self, bpm: u32, rr_intervals_ms: Vec<u32>);
    fn status_changed(&self, status: String);
    fn display_updated(&self, ops: Vec<DrawOp>);
    fn battery_changed(&self, level: u8);
    /// A recording was written under the given file name.
    fn snapshot_ready(&self, file_name: String);
}

#[derive(uniffi::Object)]
pub struct EcgCore {
    runtime: Runtime,
    monitor: SharedMonitor,
    session: tokio::sync::Mutex<Option<Session>>,
    delegate: Arc<dyn CoreDelegate>,
    /// Ops of the latest static redraw, handed out by the next `render_tick`.
    pending: Mutex<DisplayList>,
    log: Logger,
}

#[uniffi::export]
impl EcgCore {
    #[uniffi::constructor]
    pub fn new(config: MonitorConfig, delegate: Box<dyn CoreDelegate>) -> Result<Arc<Self>, CoreError> {
        let log = log::create_logger("core");
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        info!(log, "Core created"; "sample_rate" => config.sample_rate);

        Ok(Arc::new(Self {
            runtime,
            monitor: Arc::new(RwLock::new(Monitor::new(config, log.new(o!("part" => "monitor"))))),
            session: tokio::sync::Mutex::new(None),
            delegate: Arc::from(delegate),
            pending: Mutex::new(DisplayList::new()),
            log,
        }))
    }

    /// Scans for a Polar H10, connects and starts streaming.
    pub fn connect_polar(&self, scan_timeout_seconds: u32) -> Result<(), CoreError> {
        self.runtime.block_on(async {
            let log = self.log.new(o!("part" => "polar"));
            let transport = PolarH10::connect(Duration::from_secs(scan_timeout_seconds as u64), log).await?;
            self.start_session(Box::new(transport)).await
        })
    }

    /// Streams a synthetic ECG at the given rate.
    pub fn start_mock(&self, bpm: f64) -> Result<(), CoreError> {
        self.runtime.block_on(async {
            let transport = MockTransport::new(bpm, self.log.new(o!("part" => "mock")));
            self.start_session(Box::new(transport)).await
        })
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        self.runtime.block_on(async {
            let session = self.session.lock().await.take();
            match session {
                Some(session) => session.stop().await,
                None => {
                    self.monitor.write().await.stop_stream();
                    Ok(())
                }
            }
        })
    }

    /// For hosts that run the transport themselves: begins a stream fed through
    /// `push_frame` and drawn through `render_tick`.
    pub fn start_external_stream(&self) -> Result<(), CoreError> {
        self.runtime.block_on(async {
            let mut session = self.session.lock().await;
            self.reap_dropped(&mut session).await;
            if session.is_some() {
                return Err(CoreError::AlreadyStreaming);
            }
            self.monitor.write().await.start_stream();
            Ok(())
        })
    }

    pub fn push_frame(&self, kind: FrameKind, data: Vec<u8>) {
        let report = self.monitor.blocking_write().handle_frame(kind, &data);
        if let Some(report) = report {
            self.delegate.device_heart_rate(report.bpm as u32, report.rr_intervals_ms);
        }
    }

    /// Draw operations for one animation frame.
    pub fn render_tick(&self) -> Vec<DrawOp> {
        let mut list = self.take_pending();
        let notices = {
            let mut monitor = self.monitor.blocking_write();
            monitor.render_tick(&mut list, tick_time());
            monitor.take_notices()
        };
        forward(self.delegate.as_ref(), notices);
        list.take()
    }

    pub fn heart_rate(&self) -> Option<f64> {
        let (analysis, samples) = self.monitor.blocking_read().estimate_input()?;
        analysis.estimate_bpm(&samples)
    }

    pub fn last_device_report(&self) -> Option<HeartRateReport> {
        self.monitor.blocking_read().last_report().cloned()
    }

    pub fn config(&self) -> MonitorConfig {
        self.monitor.blocking_read().config().clone()
    }

    pub fn set_config(&self, config: MonitorConfig) {
        self.monitor.blocking_write().set_config(config);
    }

    pub fn resize(&self, layout: Layout) {
        self.monitor.blocking_write().resize(layout);
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.monitor.blocking_read().display_mode()
    }

    pub fn show_live(&self) {
        self.monitor.blocking_write().show_live();
    }

    pub fn show_last(&self) {
        let mut list = self.lock_pending();
        self.monitor.blocking_write().show_last(&mut *list);
    }

    /// Shows a record previously produced by `export_snapshot`.
    pub fn load_snapshot(&self, json: String) -> Result<(), CoreError> {
        let mut list = self.lock_pending();
        self.monitor.blocking_write().load_record(&json, &mut *list)
    }

    /// JSON of the strip currently on display.
    pub fn export_snapshot(&self) -> Result<String, CoreError> {
        let record = self.monitor.blocking_read().export_current(chrono::Local::now())?;
        info!(self.log, "Snapshot exported"; "samples" => record.samples.len());
        record.to_json()
    }

    pub fn start_recording(&self, directory: String, config: RecordingConfig) -> Result<(), CoreError> {
        let sink = DirectorySink::new(&directory)?;
        info!(self.log, "Recording to directory"; "path" => &directory);
        self.monitor
            .blocking_write()
            .start_recording(Box::new(sink), config, tick_time());
        Ok(())
    }

    pub fn stop_recording(&self) {
        self.monitor.blocking_write().stop_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.monitor.blocking_read().is_recording()
    }

    /// Runs the estimator over every record in `directory` in windows of
    /// `interval_seconds` and writes `timestamp,bpm` lines to `output`. Returns the number
    /// of lines written.
    pub fn extract_heart_rate(&self, directory: String, interval_seconds: u32, output: String) -> Result<u32, CoreError> {
        let log = self.log.new(o!("part" => "offline"));
        let records = analysis::offline::load_directory(Path::new(&directory))?;
        let rows = analysis::offline::windowed_heart_rate(&records, interval_seconds, &log);
        analysis::offline::write_rate_csv(Path::new(&output), &rows)?;
        Ok(rows.len() as u32)
    }
}

impl EcgCore {
    async fn start_session(&self, transport: Box<dyn Transport>) -> Result<(), CoreError> {
        let mut session = self.session.lock().await;
        self.reap_dropped(&mut session).await;
        if session.is_some() {
            return Err(CoreError::AlreadyStreaming);
        }
        let log = self.log.new(o!("part" => "session"));
        match Session::start(transport, self.monitor.clone(), self.delegate.clone(), log).await {
            Ok(started) => {
                *session = Some(started);
                Ok(())
            }
            Err(err) => {
                warn!(self.log, "Could not start stream"; "error" => %err);
                self.delegate.status_changed(err.to_string());
                Err(err)
            }
        }
    }

    /// Clears out a session whose link dropped so a new one can take its place.
    async fn reap_dropped(&self, slot: &mut Option<Session>) {
        let dropped = match slot.as_ref() {
            Some(session) => !session.is_streaming().await,
            None => false,
        };
        if !dropped {
            return;
        }
        if let Some(session) = slot.take() {
            info!(self.log, "Clearing dropped stream");
            if let Err(err) = session.stop().await {
                warn!(self.log, "Dropped stream did not stop cleanly"; "error" => %err);
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, DisplayList> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_pending(&self) -> DisplayList {
        std::mem::take(&mut *self.lock_pending())
    }
}

impl Drop for EcgCore {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            if let Err(err) = self.runtime.block_on(session.stop()) {
                warn!(self.log, "Stream did not stop cleanly"; "error" => %err);
            }
        }
    }
}
