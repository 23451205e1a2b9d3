use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::{FilterMode, MonitorConfig, DEFAULT_SAMPLE_RATE};
use crate::error::{CoreError, Result};

/// Local wall-clock time without offset, as written to exports and the BPM log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const FILE_NAME_FORMAT: &str = "ECG_%Y-%m-%d-%H-%M-%S.json";
const DEFAULT_UV_PER_DIV: u32 = 1000;

/// One completed sweep: the filtered samples it drew and when it started.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub started_at: DateTime<Local>,
    pub samples: Vec<i32>,
}

impl Snapshot {
    pub fn new(started_at: DateTime<Local>, samples: Vec<i32>) -> Self {
        Self { started_at, samples }
    }
}

/// A stored ECG strip together with the display settings it was captured under.
#[derive(Debug, Clone, PartialEq)]
pub struct EcgRecord {
    pub timestamp: DateTime<Local>,
    pub sample_rate: u32,
    pub uv_per_div: u32,
    pub filter_mode: FilterMode,
    pub samples: Vec<i32>,
}

#[derive(Serialize, Deserialize)]
struct RecordFile {
    timestamp: String,
    #[serde(rename = "sampleRate", default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(rename = "uV_per_div", default = "default_uv_per_div")]
    uv_per_div: u32,
    #[serde(rename = "filterMode", default)]
    filter_mode: String,
    samples_base64: String,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_uv_per_div() -> u32 {
    DEFAULT_UV_PER_DIV
}

impl EcgRecord {
    /// The file format keeps whole seconds only, so the timestamp is truncated here.
    pub fn from_snapshot(snapshot: &Snapshot, config: &MonitorConfig) -> Self {
        Self {
            timestamp: truncate_to_seconds(snapshot.started_at),
            sample_rate: config.sample_rate,
            uv_per_div: config.uv_per_div,
            filter_mode: config.filter_mode,
            samples: snapshot.samples.clone(),
        }
    }

    pub fn file_name(&self) -> String {
        self.timestamp.format(FILE_NAME_FORMAT).to_string()
    }

    pub fn to_json(&self) -> Result<String> {
        let file = RecordFile {
            timestamp: format_timestamp(&self.timestamp),
            sample_rate: self.sample_rate,
            uv_per_div: self.uv_per_div,
            filter_mode: self.filter_mode.as_str().to_string(),
            samples_base64: encode_samples(&self.samples),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: RecordFile = serde_json::from_str(json)?;
        if file.timestamp.is_empty() {
            return Err(CoreError::InvalidSnapshot("missing timestamp".to_string()));
        }
        if file.sample_rate == 0 {
            return Err(CoreError::InvalidSnapshot("sample rate must be positive".to_string()));
        }

        Ok(Self {
            timestamp: parse_timestamp(&file.timestamp)?,
            sample_rate: file.sample_rate,
            uv_per_div: file.uv_per_div,
            // records written by newer builds may carry filters this one does not know
            filter_mode: file.filter_mode.parse().unwrap_or_default(),
            samples: decode_samples(&file.samples_base64)?,
        })
    }
}

pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|err| CoreError::InvalidSnapshot(format!("timestamp '{text}': {err}")))?;
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(timestamp) => Ok(timestamp),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => Err(CoreError::InvalidSnapshot(format!(
            "timestamp '{text}' does not exist in the local time zone"
        ))),
    }
}

fn truncate_to_seconds(timestamp: DateTime<Local>) -> DateTime<Local> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

/// Little-endian 32-bit signed integers, base64 with padding.
pub fn encode_samples(samples: &[i32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

pub fn decode_samples(encoded: &str) -> Result<Vec<i32>> {
    let bytes = STANDARD.decode(encoded.trim())?;
    if bytes.len() % 4 != 0 {
        return Err(CoreError::InvalidSnapshot(format!(
            "sample payload of {} bytes is not a whole number of 32-bit values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(samples: Vec<i32>) -> EcgRecord {
        EcgRecord {
            timestamp: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            sample_rate: 130,
            uv_per_div: 500,
            filter_mode: FilterMode::SavitzkyGolay,
            samples,
        }
    }

    #[test]
    fn export_then_import_reproduces_the_record() {
        let original = record(vec![0, 1, -1, 0x7FFFFF, -0x800000, i32::MAX, i32::MIN, 4242]);
        let json = original.to_json().unwrap();
        let restored = EcgRecord::from_json(&json).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn export_uses_the_documented_field_names() {
        let json = record(vec![1]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timestamp"], "2024-03-09T14:05:07");
        assert_eq!(value["sampleRate"], 130);
        assert_eq!(value["uV_per_div"], 500);
        assert_eq!(value["filterMode"], "savitzky");
        assert_eq!(value["samples_base64"], "AQAAAA==");
    }

    #[test]
    fn file_name_replaces_separators() {
        assert_eq!(record(vec![]).file_name(), "ECG_2024-03-09-14-05-07.json");
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let json = r#"{"timestamp":"2024-01-02T03:04:05","samples_base64":"AgAAAP7///8="}"#;
        let record = EcgRecord::from_json(json).unwrap();
        assert_eq!(record.sample_rate, 130);
        assert_eq!(record.uv_per_div, 1000);
        assert_eq!(record.filter_mode, FilterMode::None);
        assert_eq!(record.samples, vec![2, -2]);
    }

    #[test]
    fn malformed_imports_are_rejected() {
        assert!(matches!(EcgRecord::from_json("{"), Err(CoreError::Json(_))));
        assert!(matches!(
            EcgRecord::from_json(r#"{"timestamp":"2024-01-02T03:04:05","samples_base64":"%%%"}"#),
            Err(CoreError::Base64(_))
        ));
        assert!(matches!(
            EcgRecord::from_json(r#"{"timestamp":"2024-01-02T03:04:05","samples_base64":"AQID"}"#),
            Err(CoreError::InvalidSnapshot(_))
        ));
        assert!(matches!(
            EcgRecord::from_json(r#"{"timestamp":"yesterday","samples_base64":""}"#),
            Err(CoreError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn snapshot_timestamp_is_truncated_to_seconds() {
        let started_at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(640);
        let snapshot = Snapshot::new(started_at, vec![5, 6]);
        let record = EcgRecord::from_snapshot(&snapshot, &MonitorConfig::default());
        assert_eq!(record.timestamp.nanosecond(), 0);
        assert_eq!(EcgRecord::from_json(&record.to_json().unwrap()).unwrap(), record);
    }
}
