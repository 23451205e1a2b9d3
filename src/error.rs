use std::io;

use thiserror::Error;

/// User-visible failures. Decode anomalies and "not enough data" conditions are never
/// reported through this type; they surface as empty results or `None`.
#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum CoreError {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("no matching device found")]
    DeviceNotFound,
    #[error("characteristic {0} not found on device")]
    CharacteristicMissing(String),
    #[error("device is not connected")]
    NotConnected,
    #[error("a stream is already running")]
    AlreadyStreaming,
    #[error("storage error: {0}")]
    Storage(io::Error),
    #[error("permission to write recordings was lost")]
    PermissionLost,
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("csv error: {0}")]
    Csv(csv::Error),
    #[error("no ECG data to export")]
    NothingToExport,
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CoreError::PermissionLost,
            _ => CoreError::Storage(err),
        }
    }
}

impl From<csv::Error> for CoreError {
    fn from(err: csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(io) if io.kind() == io::ErrorKind::PermissionDenied => CoreError::PermissionLost,
            _ => CoreError::Csv(err),
        }
    }
}

impl CoreError {
    pub fn is_permission_lost(&self) -> bool {
        matches!(self, CoreError::PermissionLost)
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
