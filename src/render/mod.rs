use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use slog::{debug, info, Logger};

use crate::config::MonitorConfig;
use crate::storage::snapshot::Snapshot;
use crate::storage::SampleBuffers;

pub mod canvas;
pub mod grid;

use canvas::{Canvas, DrawOp, Point};

const TRACE_COLOR: u32 = 0x0052CC;
const TRACE_WIDTH: f64 = 1.5;
/// Share of the nominal sweep duration that must pass between two autosaves. The duration
/// is `sweep_seconds`, the time of one row, whatever the row count.
const AUTOSAVE_THROTTLE: f64 = 0.9;

/// Size of the host view in pixels.
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct Layout {
    pub width: f64,
    pub height: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
        }
    }
}

/// Pixel mapping of one configuration onto one layout. Half a row of margin is kept above
/// and below the rows for legends.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub width: f64,
    pub top: f64,
    pub rows: u32,
    pub row_height: f64,
    pub sweep_seconds: u32,
    pub uv_per_div: u32,
    pub pixels_per_second: f64,
    pub pixels_per_sample: f64,
    pub samples_per_row: usize,
    /// Pixels per microvolt.
    pub gain: f64,
}

impl Geometry {
    /// `None` when the view has no drawable area.
    pub fn new(config: &MonitorConfig, layout: Layout) -> Option<Self> {
        if !(layout.width > 0.0 && layout.height > 0.0) {
            return None;
        }
        let rows = config.rows.max(1);
        let sweep_seconds = config.sweep_seconds.max(1);
        let sample_rate = config.sample_rate.max(1);

        let row_height = layout.height / (rows as f64 + 1.0);
        let pixels_per_second = layout.width / sweep_seconds as f64;
        Some(Self {
            width: layout.width,
            top: row_height / 2.0,
            rows,
            row_height,
            sweep_seconds,
            uv_per_div: config.uv_per_div.max(1),
            pixels_per_second,
            pixels_per_sample: pixels_per_second / sample_rate as f64,
            samples_per_row: (sweep_seconds * sample_rate) as usize,
            gain: row_height / config.uv_per_div.max(1) as f64,
        })
    }

    pub fn plot_height(&self) -> f64 {
        self.rows as f64 * self.row_height
    }

    pub fn view_height(&self) -> f64 {
        self.plot_height() + 2.0 * self.top
    }

    pub fn row_center(&self, row: u32) -> f64 {
        self.top + row as f64 * self.row_height + self.row_height / 2.0
    }

    pub fn point(&self, row: u32, column: usize, sample: i32) -> Point {
        Point::new(
            column as f64 * self.pixels_per_sample,
            self.row_center(row) - sample as f64 * self.gain,
        )
    }
}

/// Pen position within the sweep on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub column: usize,
    pub row: u32,
    /// Where the trace stopped on the last tick, so the next one connects to it.
    pub last_point: Option<Point>,
    pub started_at: DateTime<Local>,
    /// Samples drawn in this sweep.
    pub plotted: usize,
}

impl Cursor {
    fn new(started_at: DateTime<Local>) -> Self {
        Self {
            column: 0,
            row: 0,
            last_point: None,
            started_at,
            plotted: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepState {
    AwaitingReset,
    Sweeping(Cursor),
}

/// Monotonic and wall-clock time of one animation tick.
#[derive(Debug, Clone, Copy)]
pub struct TickTime {
    pub instant: Instant,
    pub wall: DateTime<Local>,
}

impl TickTime {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub drawn: usize,
    /// Sweeps finished during this tick, oldest first.
    pub completed: Vec<Snapshot>,
    /// Completed sweeps that passed the autosave throttle.
    pub autosave: Vec<Snapshot>,
}

pub struct SweepRenderer {
    state: SweepState,
    config: MonitorConfig,
    layout: Layout,
    last_autosave: Option<Instant>,
    log: Logger,
}

impl SweepRenderer {
    pub fn new(config: MonitorConfig, layout: Layout, log: Logger) -> Self {
        Self {
            state: SweepState::AwaitingReset,
            config,
            layout,
            last_autosave: None,
            log,
        }
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn geometry(&self) -> Option<Geometry> {
        Geometry::new(&self.config, self.layout)
    }

    /// False until the host has given the view a drawable size.
    pub fn can_draw(&self) -> bool {
        self.geometry().is_some()
    }

    /// Drops the sweep on screen; the next tick starts over from a fresh grid.
    pub fn invalidate(&mut self) {
        self.state = SweepState::AwaitingReset;
    }

    pub fn set_config(&mut self, config: MonitorConfig) {
        if config.affects_display(&self.config) || config.sample_rate != self.config.sample_rate {
            self.invalidate();
        }
        self.config = config;
    }

    pub fn resize(&mut self, layout: Layout) {
        if layout != self.layout {
            debug!(self.log, "Layout changed"; "width" => layout.width, "height" => layout.height);
            self.layout = layout;
            self.invalidate();
        }
    }

    /// Draws everything waiting in the intake queue.
    ///
    /// With `recording` set, completed sweeps are offered for autosave, at most one per
    /// throttle period.
    pub fn tick(
        &mut self,
        buffers: &mut SampleBuffers,
        canvas: &mut dyn Canvas,
        time: TickTime,
        recording: bool,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let Some(geometry) = self.geometry() else {
            buffers.discard_pending();
            return outcome;
        };

        let mut cursor = match std::mem::replace(&mut self.state, SweepState::AwaitingReset) {
            SweepState::Sweeping(cursor) => cursor,
            SweepState::AwaitingReset => {
                buffers.restart_scan();
                self.draw_background(canvas, &geometry, &time.wall);
                Cursor::new(time.wall)
            }
        };

        let samples = buffers.drain_intake();
        outcome.drawn = samples.len();
        let mut path: Vec<Point> = cursor.last_point.into_iter().collect();

        for sample in samples {
            let point = geometry.point(cursor.row, cursor.column, sample);
            path.push(point);
            cursor.last_point = Some(point);
            cursor.column += 1;
            cursor.plotted += 1;

            if cursor.column < geometry.samples_per_row {
                continue;
            }

            flush(canvas, &mut path);
            cursor.column = 0;
            cursor.row += 1;
            cursor.last_point = None;

            if cursor.row >= geometry.rows {
                let snapshot = Snapshot::new(cursor.started_at, buffers.take_scan(cursor.plotted));
                self.complete_sweep(buffers, &snapshot, time.instant, recording, &mut outcome);
                cursor = Cursor::new(time.wall);
                self.draw_background(canvas, &geometry, &time.wall);
            }
        }
        flush(canvas, &mut path);

        self.state = SweepState::Sweeping(cursor);
        outcome
    }

    fn complete_sweep(
        &mut self,
        buffers: &mut SampleBuffers,
        snapshot: &Snapshot,
        now: Instant,
        recording: bool,
        outcome: &mut TickOutcome,
    ) {
        info!(self.log, "Sweep complete"; "samples" => snapshot.samples.len(), "started_at" => %snapshot.started_at);
        buffers.set_last_sweep(snapshot.clone());
        outcome.completed.push(snapshot.clone());

        if !recording {
            return;
        }
        let min_gap = Duration::from_secs_f64(AUTOSAVE_THROTTLE * self.config.sweep_seconds as f64);
        let allowed = self
            .last_autosave
            .map_or(true, |last| now.saturating_duration_since(last) >= min_gap);
        if allowed {
            self.last_autosave = Some(now);
            outcome.autosave.push(snapshot.clone());
        } else {
            debug!(self.log, "Autosave throttled");
        }
    }

    fn draw_background(&self, canvas: &mut dyn Canvas, geometry: &Geometry, started_at: &DateTime<Local>) {
        grid::draw_background(canvas, geometry, Some(started_at), self.config.filter_mode.label());
    }
}

fn flush(canvas: &mut dyn Canvas, path: &mut Vec<Point>) {
    if path.len() >= 2 {
        canvas.draw(DrawOp::Path {
            points: std::mem::take(path),
            color: TRACE_COLOR,
            width: TRACE_WIDTH,
        });
    }
    path.clear();
}

/// Paints a stored strip from the top-left, stopping after the last row.
pub fn draw_record(
    canvas: &mut dyn Canvas,
    geometry: &Geometry,
    samples: &[i32],
    started_at: Option<&DateTime<Local>>,
    filter_label: &str,
) {
    grid::draw_background(canvas, geometry, started_at, filter_label);

    let rows = geometry.rows as usize;
    for (row, chunk) in samples.chunks(geometry.samples_per_row.max(1)).take(rows).enumerate() {
        let mut path: Vec<Point> = chunk
            .iter()
            .enumerate()
            .map(|(column, &sample)| geometry.point(row as u32, column, sample))
            .collect();
        flush(canvas, &mut path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::canvas::DisplayList;

    fn config() -> MonitorConfig {
        MonitorConfig {
            sweep_seconds: 2,
            rows: 3,
            sample_rate: 10,
            ..Default::default()
        }
    }

    fn renderer() -> SweepRenderer {
        SweepRenderer::new(config(), Layout { width: 200.0, height: 400.0 }, crate::log::silent())
    }

    fn time_at(start: Instant, seconds: f64) -> TickTime {
        TickTime {
            instant: start + Duration::from_secs_f64(seconds),
            wall: Local::now(),
        }
    }

    fn paths(list: &DisplayList) -> Vec<&Vec<Point>> {
        list.ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Path { points, .. } => Some(points),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_tick_draws_the_grid_and_starts_sweeping() {
        let mut renderer = renderer();
        let mut buffers = SampleBuffers::new(config().samples_per_sweep());
        let mut list = DisplayList::new();

        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        assert!(matches!(list.ops()[0], DrawOp::Clear { .. }));
        assert!(matches!(renderer.state(), SweepState::Sweeping(c) if c.row == 0 && c.column == 0));
    }

    #[test]
    fn trace_wraps_to_the_next_row() {
        let mut renderer = renderer();
        let mut buffers = SampleBuffers::new(60);
        let mut list = DisplayList::new();

        buffers.append(&vec![0; 25]);
        let outcome = renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        assert_eq!(outcome.drawn, 25);
        assert!(outcome.completed.is_empty());

        let paths = paths(&list);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].len(), 20);
        // the second row starts at the left edge, one row lower
        assert_eq!(paths[1][0].x, 0.0);
        assert!(paths[1][0].y > paths[0][0].y);

        match renderer.state() {
            SweepState::Sweeping(cursor) => {
                assert_eq!(cursor.row, 1);
                assert_eq!(cursor.column, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trace_continues_across_ticks() {
        let mut renderer = renderer();
        let mut buffers = SampleBuffers::new(60);
        let mut list = DisplayList::new();

        buffers.append(&[0, 0, 0]);
        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        buffers.append(&[100]);
        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);

        let paths = paths(&list);
        let last = paths[paths.len() - 1];
        assert_eq!(last.len(), 2);
        assert_eq!(last[0], paths[0][2]);
    }

    #[test]
    fn completed_sweep_captures_exactly_one_sweep() {
        let mut renderer = renderer();
        let per_sweep = config().samples_per_sweep();
        let mut buffers = SampleBuffers::new(per_sweep);
        let mut list = DisplayList::new();

        let samples: Vec<i32> = (0..per_sweep as i32 + 7).collect();
        buffers.append(&samples);
        let outcome = renderer.tick(&mut buffers, &mut list, TickTime::now(), false);

        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].samples, samples[..per_sweep].to_vec());
        assert_eq!(buffers.last_sweep().map(|s| s.samples.len()), Some(per_sweep));
        // the overflow already belongs to the next sweep
        assert_eq!(buffers.scan(), &samples[per_sweep..]);
        assert!(outcome.autosave.is_empty());
    }

    #[test]
    fn autosave_is_throttled_to_ninety_percent_of_the_sweep() {
        let config = MonitorConfig {
            sweep_seconds: 10,
            rows: 1,
            sample_rate: 10,
            ..Default::default()
        };
        let per_sweep = config.samples_per_sweep();
        let mut renderer = SweepRenderer::new(config, Layout { width: 100.0, height: 100.0 }, crate::log::silent());
        let mut buffers = SampleBuffers::new(per_sweep);
        let mut list = DisplayList::new();
        let start = Instant::now();

        buffers.append(&vec![0; per_sweep]);
        let first = renderer.tick(&mut buffers, &mut list, time_at(start, 0.0), true);
        assert_eq!(first.autosave.len(), 1);

        // a catch-up burst finishing another sweep five seconds later
        buffers.append(&vec![0; per_sweep]);
        let second = renderer.tick(&mut buffers, &mut list, time_at(start, 5.0), true);
        assert_eq!(second.completed.len(), 1);
        assert!(second.autosave.is_empty());

        buffers.append(&vec![0; per_sweep]);
        let third = renderer.tick(&mut buffers, &mut list, time_at(start, 9.0), true);
        assert_eq!(third.autosave.len(), 1);

        // several sweeps in one tick still emit at most one
        buffers.append(&vec![0; 3 * per_sweep]);
        let burst = renderer.tick(&mut buffers, &mut list, time_at(start, 30.0), true);
        assert_eq!(burst.completed.len(), 3);
        assert_eq!(burst.autosave.len(), 1);
    }

    #[test]
    fn config_change_forces_a_reset() {
        let mut renderer = renderer();
        let mut buffers = SampleBuffers::new(60);
        let mut list = DisplayList::new();
        buffers.append(&[1, 2, 3]);
        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);

        renderer.set_config(config());
        assert!(matches!(renderer.state(), SweepState::Sweeping(_)));

        renderer.set_config(MonitorConfig { uv_per_div: 500, ..config() });
        assert_eq!(renderer.state(), &SweepState::AwaitingReset);

        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        renderer.resize(Layout { width: 300.0, height: 400.0 });
        assert_eq!(renderer.state(), &SweepState::AwaitingReset);
    }

    #[test]
    fn reset_restarts_the_scan_from_undrawn_samples() {
        let mut renderer = renderer();
        let mut buffers = SampleBuffers::new(60);
        let mut list = DisplayList::new();
        buffers.append(&[1, 2, 3]);
        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);

        renderer.invalidate();
        buffers.append(&[4, 5]);
        renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        assert_eq!(buffers.scan(), &[4, 5]);
    }

    #[test]
    fn zero_sized_view_discards_the_intake() {
        let mut renderer = SweepRenderer::new(config(), Layout::default(), crate::log::silent());
        let mut buffers = SampleBuffers::new(60);
        let mut list = DisplayList::new();
        buffers.append(&[1, 2, 3]);

        let outcome = renderer.tick(&mut buffers, &mut list, TickTime::now(), false);
        assert_eq!(outcome.drawn, 0);
        assert_eq!(buffers.intake_len(), 0);
        assert!(list.is_empty());
        assert_eq!(renderer.state(), &SweepState::AwaitingReset);
    }

    #[test]
    fn sample_height_follows_gain() {
        let geometry = Geometry::new(&config(), Layout { width: 200.0, height: 400.0 }).unwrap();
        // four slots of 100 px: three rows plus the margins
        assert_eq!(geometry.row_height, 100.0);
        assert_eq!(geometry.row_center(0), 100.0);
        let p = geometry.point(0, 0, 1000);
        assert_eq!(p.y, 0.0);
        assert_eq!(geometry.point(1, 10, 0), Point::new(100.0, 200.0));
    }

    #[test]
    fn static_record_stops_after_the_last_row() {
        let geometry = Geometry::new(&config(), Layout { width: 200.0, height: 400.0 }).unwrap();
        let mut list = DisplayList::new();
        draw_record(&mut list, &geometry, &vec![0; 100], None, "Filter: none (raw)");
        assert_eq!(paths(&list).len(), 3);
    }
}
