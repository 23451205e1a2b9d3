use chrono::Local;
use ecgcore::ble::decoder::encode_ecg_frame;
use ecgcore::ble::mock::synthetic_ecg;
use ecgcore::config::MonitorConfig;
use ecgcore::log::silent;
use ecgcore::monitor::Monitor;
use ecgcore::render::canvas::DisplayList;
use ecgcore::render::{Layout, TickTime};
use ecgcore::storage::snapshot::EcgRecord;
use ecgcore::{DrawOp, FilterMode, FrameKind};
use plotters::prelude::*;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const TRACE: (u8, u8, u8) = (0x00, 0x52, 0xCC);
const MAJOR_GRID: (u8, u8, u8) = (0xAA, 0xAA, 0xAA);

fn rgb(color: u32) -> RGBColor {
    RGBColor((color >> 16) as u8, (color >> 8) as u8, color as u8)
}

fn pixel(x: f64, y: f64) -> (i32, i32) {
    (x.round() as i32, y.round() as i32)
}

/// Rasterizes a display list the way a host view would, text aside.
fn rasterize(ops: &[DrawOp]) -> Vec<u8> {
    let mut buffer = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (WIDTH, HEIGHT)).into_drawing_area();
        for op in ops {
            match op {
                DrawOp::Clear { .. } => root.fill(&WHITE).unwrap(),
                DrawOp::Line { from, to, color, width } => root
                    .draw(&PathElement::new(
                        vec![pixel(from.x, from.y), pixel(to.x, to.y)],
                        rgb(*color).stroke_width(width.round().max(1.0) as u32),
                    ))
                    .unwrap(),
                DrawOp::Path { points, color, width } => root
                    .draw(&PathElement::new(
                        points.iter().map(|p| pixel(p.x, p.y)).collect::<Vec<_>>(),
                        rgb(*color).stroke_width(width.round().max(1.0) as u32),
                    ))
                    .unwrap(),
                DrawOp::Text { .. } => {}
            }
        }
        root.present().unwrap();
    }
    buffer
}

fn count(buffer: &[u8], color: (u8, u8, u8)) -> usize {
    buffer
        .chunks(3)
        .filter(|p| (p[0], p[1], p[2]) == color)
        .count()
}

fn monitor() -> Monitor {
    let config = MonitorConfig {
        sweep_seconds: 4,
        rows: 3,
        uv_per_div: 2000,
        ..MonitorConfig::default()
    };
    let mut monitor = Monitor::new(config, silent());
    monitor.resize(Layout {
        width: WIDTH as f64,
        height: HEIGHT as f64,
    });
    monitor
}

#[test]
fn live_sweep_paints_grid_and_trace() {
    let mut monitor = monitor();
    monitor.start_stream();
    for chunk in synthetic_ecg(6 * 130, 130, 70.0, 4).chunks(73) {
        monitor.handle_frame(FrameKind::Ecg, &encode_ecg_frame(0, chunk));
    }

    let mut list = DisplayList::new();
    let outcome = monitor.render_tick(&mut list, TickTime::now());
    assert_eq!(outcome.drawn, 6 * 130);

    let buffer = rasterize(list.ops());
    assert!(count(&buffer, MAJOR_GRID) > WIDTH as usize, "major grid missing");
    assert!(count(&buffer, TRACE) > 500, "trace missing");
}

#[test]
fn trace_stays_within_the_view() {
    let mut monitor = monitor();
    monitor.start_stream();
    for chunk in synthetic_ecg(12 * 130, 130, 70.0, 4).chunks(73) {
        monitor.handle_frame(FrameKind::Ecg, &encode_ecg_frame(0, chunk));
    }
    let mut list = DisplayList::new();
    monitor.render_tick(&mut list, TickTime::now());

    for op in list.ops() {
        if let DrawOp::Path { points, .. } = op {
            for p in points {
                assert!((0.0..=WIDTH as f64).contains(&p.x), "x {}", p.x);
                assert!((0.0..=HEIGHT as f64).contains(&p.y), "y {}", p.y);
            }
        }
    }
}

#[test]
fn loaded_record_paints_like_a_sweep() {
    let mut monitor = monitor();
    let record = EcgRecord {
        timestamp: Local::now(),
        sample_rate: 130,
        uv_per_div: 1000,
        filter_mode: FilterMode::MovingAverage,
        samples: synthetic_ecg(12 * 130, 130, 70.0, 8),
    };

    let mut list = DisplayList::new();
    monitor.load_record(&record.to_json().unwrap(), &mut list).unwrap();
    let buffer = rasterize(list.ops());
    assert!(count(&buffer, TRACE) > 1000);

    // three rows of four seconds each hold the whole strip
    let paths = list.ops().iter().filter(|op| matches!(op, DrawOp::Path { .. })).count();
    assert_eq!(paths, 3);
}
