use chrono::{DateTime, Local};

use crate::render::canvas::{Canvas, DrawOp, Point, TextAlign};
use crate::render::Geometry;

const MINOR_COLOR: u32 = 0xE0E0E0;
const MEDIUM_COLOR: u32 = 0xCCCCCC;
const MAJOR_COLOR: u32 = 0xAAAAAA;
const REFERENCE_COLOR: u32 = 0xE60012;
const TEXT_COLOR: u32 = 0x1A1A1A;
const FILTER_LEGEND_COLOR: u32 = 0x222222;

const TIME_PLACEHOLDER: &str = "HH:MM:SS";
const DATE_PLACEHOLDER: &str = "DD/MM/AAAA";

/// Clears the view and paints grid, reference bar, legends and the sweep timestamp.
pub fn draw_background(
    canvas: &mut dyn Canvas,
    geometry: &Geometry,
    started_at: Option<&DateTime<Local>>,
    filter_label: &str,
) {
    canvas.draw(DrawOp::Clear {
        width: geometry.width,
        height: geometry.view_height(),
    });
    draw_grid(canvas, geometry);
    draw_reference_bar(canvas, geometry);
    draw_legend(canvas, geometry, filter_label);
    draw_timestamp(canvas, geometry, started_at);
}

pub fn draw_grid(canvas: &mut dyn Canvas, geometry: &Geometry) {
    let top = geometry.top;
    let bottom = geometry.top + geometry.plot_height();
    let width = geometry.width;
    let pps = geometry.pixels_per_second;

    let minor_y = geometry.row_height / 10.0;
    for y in steps(minor_y, minor_y, geometry.plot_height()) {
        horizontal(canvas, top + y, width, MINOR_COLOR, 0.5);
    }
    let minor_x = pps / 10.0;
    for x in steps(minor_x, minor_x, width) {
        vertical(canvas, x, top, bottom, MINOR_COLOR, 0.5);
    }

    for x in steps(pps / 2.0, pps, width) {
        vertical(canvas, x, top, bottom, MEDIUM_COLOR, 0.75);
    }

    for row in 1..geometry.rows {
        horizontal(canvas, top + row as f64 * geometry.row_height, width, MAJOR_COLOR, 1.0);
    }
    for second in 1..geometry.sweep_seconds {
        vertical(canvas, second as f64 * pps, top, bottom, MAJOR_COLOR, 1.0);
    }
}

/// One second wide, centered below the last row.
fn draw_reference_bar(canvas: &mut dyn Canvas, geometry: &Geometry) {
    let bar = geometry.pixels_per_second;
    let start = (geometry.width - bar) / 2.0;
    let end = start + bar;
    let y = geometry.top + geometry.plot_height() + geometry.top / 2.0;
    let tick = 4.0;

    let line = |from: Point, to: Point| DrawOp::Line {
        from,
        to,
        color: REFERENCE_COLOR,
        width: 2.0,
    };
    canvas.draw(line(Point::new(start, y), Point::new(end, y)));
    canvas.draw(line(Point::new(start, y - tick), Point::new(start, y + tick)));
    canvas.draw(line(Point::new(end, y - tick), Point::new(end, y + tick)));
    canvas.draw(DrawOp::Text {
        at: Point::new(geometry.width / 2.0, y + 5.0),
        text: "1 s".to_string(),
        color: REFERENCE_COLOR,
        size: 12.0,
        align: TextAlign::Center,
    });
}

fn draw_legend(canvas: &mut dyn Canvas, geometry: &Geometry, filter_label: &str) {
    let bottom = geometry.view_height();
    canvas.draw(DrawOp::Text {
        at: Point::new(10.0, bottom - 15.0),
        text: format!("{} µV/div", (geometry.uv_per_div as f64 / 10.0).round()),
        color: TEXT_COLOR,
        size: 14.0,
        align: TextAlign::Left,
    });
    canvas.draw(DrawOp::Text {
        at: Point::new(10.0, bottom - 2.0),
        text: "0,1 s/div".to_string(),
        color: TEXT_COLOR,
        size: 14.0,
        align: TextAlign::Left,
    });
    canvas.draw(DrawOp::Text {
        at: Point::new(18.0, geometry.top / 2.0),
        text: filter_label.to_string(),
        color: FILTER_LEGEND_COLOR,
        size: 13.0,
        align: TextAlign::Left,
    });
}

pub fn draw_timestamp(canvas: &mut dyn Canvas, geometry: &Geometry, started_at: Option<&DateTime<Local>>) {
    let (time, date) = timestamp_labels(started_at);
    let bottom = geometry.view_height();
    let x = geometry.width - 10.0;
    for (text, y) in [(time, bottom - 15.0), (date, bottom - 2.0)] {
        canvas.draw(DrawOp::Text {
            at: Point::new(x, y),
            text,
            color: TEXT_COLOR,
            size: 14.0,
            align: TextAlign::Right,
        });
    }
}

pub fn timestamp_labels(started_at: Option<&DateTime<Local>>) -> (String, String) {
    match started_at {
        Some(timestamp) => (
            timestamp.format("%H:%M:%S").to_string(),
            timestamp.format("%d/%m/%Y").to_string(),
        ),
        None => (TIME_PLACEHOLDER.to_string(), DATE_PLACEHOLDER.to_string()),
    }
}

fn horizontal(canvas: &mut dyn Canvas, y: f64, width: f64, color: u32, line_width: f64) {
    canvas.draw(DrawOp::Line {
        from: Point::new(0.0, y),
        to: Point::new(width, y),
        color,
        width: line_width,
    });
}

fn vertical(canvas: &mut dyn Canvas, x: f64, top: f64, bottom: f64, color: u32, line_width: f64) {
    canvas.draw(DrawOp::Line {
        from: Point::new(x, top),
        to: Point::new(x, bottom),
        color,
        width: line_width,
    });
}

/// `start, start + step, ...` strictly below `end`. Counted rather than accumulated so
/// rounding cannot add or drop a line.
fn steps(start: f64, step: f64, end: f64) -> impl Iterator<Item = f64> {
    let count = if step > 0.0 && end > start {
        ((end - start) / step - 1e-9).ceil().max(0.0) as usize
    } else {
        0
    };
    (0..count).map(move |i| start + i as f64 * step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::render::canvas::DisplayList;
    use crate::render::Layout;
    use chrono::TimeZone;

    fn geometry() -> Geometry {
        let config = MonitorConfig {
            sweep_seconds: 4,
            rows: 2,
            ..Default::default()
        };
        Geometry::new(&config, Layout { width: 400.0, height: 300.0 }).unwrap()
    }

    fn lines_with(ops: &[DrawOp], wanted: u32) -> usize {
        ops.iter()
            .filter(|op| matches!(op, DrawOp::Line { color, .. } if *color == wanted))
            .count()
    }

    #[test]
    fn steps_stop_before_the_end() {
        assert_eq!(steps(10.0, 10.0, 40.0).collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);
        assert_eq!(steps(0.5, 1.0, 3.0).collect::<Vec<_>>(), vec![0.5, 1.5, 2.5]);
        assert_eq!(steps(1.0, 0.0, 3.0).count(), 0);
    }

    #[test]
    fn grid_has_major_lines_per_row_and_second() {
        let mut list = DisplayList::new();
        draw_grid(&mut list, &geometry());
        // one row boundary, three inner seconds
        assert_eq!(lines_with(list.ops(), MAJOR_COLOR), 1 + 3);
        // half-second marks
        assert_eq!(lines_with(list.ops(), MEDIUM_COLOR), 4);
        // 19 horizontal, 39 vertical minor lines
        assert_eq!(lines_with(list.ops(), MINOR_COLOR), 19 + 39);
    }

    #[test]
    fn background_starts_with_clear_and_labels() {
        let mut list = DisplayList::new();
        let started = Local.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        draw_background(&mut list, &geometry(), Some(&started), "Filter: none (raw)");

        assert!(matches!(list.ops()[0], DrawOp::Clear { .. }));
        let texts: Vec<&str> = list
            .ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(texts.contains(&"1 s"));
        assert!(texts.contains(&"100 µV/div"));
        assert!(texts.contains(&"0,1 s/div"));
        assert!(texts.contains(&"Filter: none (raw)"));
        assert!(texts.contains(&"04:05:06"));
        assert!(texts.contains(&"03/02/2024"));
    }

    #[test]
    fn unknown_start_shows_placeholders() {
        assert_eq!(
            timestamp_labels(None),
            ("HH:MM:SS".to_string(), "DD/MM/AAAA".to_string())
        );
    }
}
