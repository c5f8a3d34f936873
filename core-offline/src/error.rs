use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the offline media API.
///
/// Transfer problems never surface here; they are recorded on the item as
/// a [`TransferError`] message instead.
#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Download {0} not found")]
    NotFound(String),

    #[error("Invalid download ID: {0}")]
    InvalidId(String),

    #[error("Cannot apply {event} to a download in state {from}")]
    InvalidTransition { from: String, event: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] BridgeError),

    #[error("Insufficient storage: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Invalid offline configuration: {0}")]
    Config(String),

    #[error("Corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Offline service not initialized")]
    NotInitialized,

    #[error("Offline service is shut down")]
    ShutDown,
}

impl OfflineError {
    /// True for failures of the record store or the payload cache.
    pub fn is_persistence(&self) -> bool {
        matches!(self, OfflineError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;

/// Failure of a single transfer attempt.
///
/// Rendered with `Display` into the item's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Server responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("Staging failed: {0}")]
    Storage(String),

    #[error("No data received for {0:?}")]
    Stalled(Duration),
}
