use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use slog::{debug, info, Logger};

use crate::analysis::{Analysis, Parameters};
use crate::error::Result;
use crate::storage::snapshot::{format_timestamp, EcgRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub timestamp: DateTime<Local>,
    pub bpm: u32,
}

/// Loads every `ECG_*.json` record in `directory`, in file-name order, which is also
/// chronological order.
pub fn load_directory(directory: &Path) -> Result<Vec<EcgRecord>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.starts_with("ECG_") && name.ends_with(".json"))
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| EcgRecord::from_json(&fs::read_to_string(path)?))
        .collect()
}

/// Joins the records into one stream and estimates the rate of each `interval_seconds`
/// window. A trailing window shorter than half the interval is skipped, as is any window
/// the estimator has no answer for.
pub fn windowed_heart_rate(records: &[EcgRecord], interval_seconds: u32, log: &Logger) -> Vec<RateRow> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let sample_rate = first.sample_rate.max(1);
    let window = u64::from(interval_seconds.max(1)) * u64::from(sample_rate);
    let window = usize::try_from(window).unwrap_or(usize::MAX);

    let stream: Vec<i32> = records.iter().flat_map(|r| r.samples.iter().copied()).collect();
    info!(log, "Extracting heart rate";
        "records" => records.len(),
        "samples" => stream.len(),
        "window" => window);

    let analysis = Analysis::new(Parameters::for_sample_rate(sample_rate, 0), log.clone());

    let mut rows = Vec::new();
    for (index, chunk) in stream.chunks(window).enumerate() {
        if chunk.len() < window.div_ceil(2) {
            continue;
        }
        let offset_ms = (index * window) as i64 * 1000 / sample_rate as i64;
        let timestamp = first.timestamp + Duration::milliseconds(offset_ms);

        match analysis.estimate_bpm(chunk) {
            Some(bpm) => rows.push(RateRow {
                timestamp,
                bpm: bpm.round() as u32,
            }),
            None => debug!(log, "No rate for window"; "start" => format_timestamp(&timestamp)),
        }
    }
    rows
}

/// `timestamp,bpm` lines without a header.
pub fn write_rate_csv(path: &Path, rows: &[RateRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for row in rows {
        writer.write_record([format_timestamp(&row.timestamp), row.bpm.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
