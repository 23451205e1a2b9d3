use std::error::Error;

use ::plotters::prelude::*;
use ndarray::ArrayView1;

pub const PLOT_SIZE: (u32, u32) = (640, 240);

/// Draws one pipeline stage into an RGB buffer of `PLOT_SIZE`, with circles on `beats`.
pub fn plot_stage(data: ArrayView1<f64>, beats: Option<&[usize]>, buffer: &mut [u8]) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::with_buffer(buffer, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let min_value = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max_value = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (min_value, max_value) = if min_value < max_value {
        (min_value, max_value)
    } else {
        (min_value - 1.0, min_value + 1.0)
    };

    let mut chart = ChartBuilder::on(&root)
        .margin(5)
        .build_cartesian_2d(0..data.len().max(1) as i32, min_value..max_value)?;

    chart.draw_series(LineSeries::new(
        data.iter().enumerate().map(|(x, y)| (x as i32, *y)),
        &RED,
    ))?;

    if let Some(indexes) = beats {
        chart.draw_series(
            indexes
                .iter()
                .filter_map(|&index| data.get(index).map(|&value| Circle::new((index as i32, value), 5, &BLUE))),
        )?;
    }

    root.present()?;
    Ok(())
}

/// Pixels that are not white.
pub fn inked(buffer: &[u8]) -> usize {
    buffer.chunks(3).filter(|pixel| pixel.iter().any(|&c| c != 255)).count()
}
