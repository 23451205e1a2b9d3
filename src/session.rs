use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use slog::{debug, info, warn, Logger};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;

use crate::ble::{FrameStream, Transport};
use crate::error::Result;
use crate::monitor::{Monitor, Notice};
use crate::render::canvas::DisplayList;
use crate::render::TickTime;
use crate::CoreDelegate;

pub const DISPLAY_TICK: Duration = Duration::from_millis(16);
pub const HEART_RATE_TICK: Duration = Duration::from_millis(500);
pub const BPM_LOG_TICK: Duration = Duration::from_secs(1);
pub const AUTOSAVE_POLL: Duration = Duration::from_secs(2);
pub const BATTERY_POLL: Duration = Duration::from_secs(120);

pub type SharedMonitor = Arc<RwLock<Monitor>>;
type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// One running stream: the frame pump, the display tick and the housekeeping timers,
/// all tied to one transport.
pub struct Session {
    transport: SharedTransport,
    monitor: SharedMonitor,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    log: Logger,
}

impl Session {
    pub async fn start(
        transport: Box<dyn Transport>,
        monitor: SharedMonitor,
        delegate: Arc<dyn CoreDelegate>,
        log: Logger,
    ) -> Result<Self> {
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let frames = transport.lock().await.start().await?;
        monitor.write().await.start_stream();

        let (shutdown, signal) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let tasks = vec![
            tokio::spawn(pump(
                frames,
                monitor.clone(),
                delegate.clone(),
                shutdown.clone(),
                signal.clone(),
                log.clone(),
            )),
            tokio::spawn(display(monitor.clone(), delegate.clone(), signal.clone())),
            tokio::spawn(housekeeping(
                monitor.clone(),
                transport.clone(),
                delegate.clone(),
                signal,
                log.clone(),
            )),
        ];
        delegate.status_changed("Streaming".to_string());
        info!(log, "Session started");

        Ok(Self {
            transport,
            monitor,
            shutdown,
            tasks,
            log,
        })
    }

    /// False once the transport stream has ended on its own.
    pub async fn is_streaming(&self) -> bool {
        self.monitor.read().await.is_streaming()
    }

    /// Halts every loop before the transport is told to stop, so no tick runs after this
    /// returns.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(self.log, "Session task failed"; "error" => %err);
            }
        }
        self.monitor.write().await.stop_stream();
        let result = self.transport.lock().await.stop().await;
        info!(self.log, "Session stopped");
        result
    }
}

pub(crate) fn tick_time() -> TickTime {
    // tokio's clock so that paused-time tests see time pass
    TickTime {
        instant: tokio::time::Instant::now().into_std(),
        wall: Local::now(),
    }
}

pub(crate) fn forward(delegate: &dyn CoreDelegate, notices: Vec<Notice>) {
    for notice in notices {
        match notice {
            Notice::Status(text) => delegate.status_changed(text),
            Notice::SnapshotSaved(name) => delegate.snapshot_ready(name),
        }
    }
}

async fn pump(
    mut frames: FrameStream,
    monitor: SharedMonitor,
    delegate: Arc<dyn CoreDelegate>,
    shutdown: Arc<watch::Sender<bool>>,
    mut signal: watch::Receiver<bool>,
    log: Logger,
) {
    loop {
        tokio::select! {
            _ = signal.changed() => break,
            frame = frames.next() => match frame {
                Some((kind, data)) => {
                    let report = monitor.write().await.handle_frame(kind, &data);
                    if let Some(report) = report {
                        delegate.device_heart_rate(report.bpm as u32, report.rr_intervals_ms);
                    }
                }
                None => {
                    warn!(log, "Transport stream ended");
                    monitor.write().await.stop_stream();
                    // the display and timers go down with the link
                    let _ = shutdown.send(true);
                    delegate.status_changed("Disconnected".to_string());
                    break;
                }
            }
        }
    }
    debug!(log, "Frame pump finished");
}

async fn display(monitor: SharedMonitor, delegate: Arc<dyn CoreDelegate>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(DISPLAY_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(ticker);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = ticks.next() => {
                let mut list = DisplayList::new();
                let notices = {
                    let mut monitor = monitor.write().await;
                    monitor.render_tick(&mut list, tick_time());
                    monitor.take_notices()
                };
                if !list.is_empty() {
                    delegate.display_updated(list.take());
                }
                forward(delegate.as_ref(), notices);
            }
        }
    }
}

async fn housekeeping(
    monitor: SharedMonitor,
    transport: SharedTransport,
    delegate: Arc<dyn CoreDelegate>,
    mut shutdown: watch::Receiver<bool>,
    log: Logger,
) {
    let mut heart_rate = interval(HEART_RATE_TICK);
    let mut bpm_log = interval(BPM_LOG_TICK);
    let mut autosave = interval(AUTOSAVE_POLL);
    let mut battery = interval(BATTERY_POLL);
    for timer in [&mut heart_rate, &mut bpm_log, &mut autosave, &mut battery] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = heart_rate.tick() => {
                let input = monitor.read().await.estimate_input();
                let bpm = input.and_then(|(analysis, samples)| analysis.estimate_bpm(&samples));
                delegate.heart_rate_changed(bpm.map(|bpm| bpm.round() as u32));
            }
            _ = bpm_log.tick() => {
                let notices = {
                    let mut monitor = monitor.write().await;
                    if let Some(bpm) = monitor.log_bpm_if_due(tick_time()) {
                        debug!(log, "BPM line written"; "bpm" => bpm);
                    }
                    monitor.take_notices()
                };
                forward(delegate.as_ref(), notices);
            }
            _ = autosave.tick() => {
                let notices = {
                    let mut monitor = monitor.write().await;
                    monitor.poll_headless_autosave(Local::now());
                    monitor.take_notices()
                };
                forward(delegate.as_ref(), notices);
            }
            _ = battery.tick() => {
                let level = transport.lock().await.battery_level().await;
                match level {
                    Ok(level) => delegate.battery_changed(level),
                    Err(err) => debug!(log, "Battery level unavailable"; "error" => %err),
                }
            }
        }
    }
}
