use std::fs::{File, OpenOptions};
use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::storage::snapshot::format_timestamp;

pub const BPM_LOG_FILE_NAME: &str = "registro_bpm.csv";
const HEADER: [&str; 2] = ["timestamp", "bpm"];

/// Mean of the heart-rate reports gathered during one logging interval, rounded.
pub fn average_bpm(reports: &[u16]) -> Option<u32> {
    if reports.is_empty() {
        return None;
    }
    let sum: u64 = reports.iter().map(|&bpm| bpm as u64).sum();
    Some((sum as f64 / reports.len() as f64).round() as u32)
}

/// Appends one `timestamp,bpm` line. The header is written only into an empty file and
/// existing lines are never rewritten.
pub fn append_bpm(path: &Path, timestamp: &DateTime<Local>, bpm: u32) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_empty {
        writer.write_record(HEADER)?;
    }
    writer.write_record([format_timestamp(timestamp), bpm.to_string()])?;
    writer.flush()?;
    Ok(())
}

/// Reads back a log written by [`append_bpm`].
pub fn read_bpm_log(path: &Path) -> Result<Vec<(String, u32)>> {
    let mut reader = csv::Reader::from_reader(File::open(path)?);
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: (String, u32) = record?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn temp_log() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ecgcore-bpm-{}.csv", uuid::Uuid::new_v4()))
    }

    #[test]
    fn averages_round_to_nearest() {
        assert_eq!(average_bpm(&[]), None);
        assert_eq!(average_bpm(&[60, 61]), Some(61));
        assert_eq!(average_bpm(&[70, 70, 71]), Some(70));
    }

    #[test]
    fn header_is_written_once_and_lines_are_appended() {
        let path = temp_log();
        let first = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let second = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 5).unwrap();

        append_bpm(&path, &first, 64).unwrap();
        append_bpm(&path, &second, 66).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "timestamp,bpm\n2024-05-01T08:00:00,64\n2024-05-01T08:00:05,66\n");
        assert_eq!(
            read_bpm_log(&path).unwrap(),
            vec![
                ("2024-05-01T08:00:00".to_string(), 64),
                ("2024-05-01T08:00:05".to_string(), 66),
            ]
        );
        fs::remove_file(&path).unwrap();
    }
}
