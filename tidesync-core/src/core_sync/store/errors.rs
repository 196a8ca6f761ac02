/*
    errors.rs - Error types for the sync engine

    Defines all error types that can occur in:
    - Entry validation during merge
    - Delta and snapshot encoding
    - Per-peer exchange bookkeeping
    - The transport seam
*/

use thiserror::Error;

/// Errors that can occur in the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Incoming entry failed validation and was excluded from the merge
    #[error("Malformed entry '{key}': {reason}")]
    MalformedEntry { key: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error (delta or snapshot could not be decoded)
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Snapshot payload failed its integrity check
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Snapshot or delta written by an unknown format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// The transport could not deliver an exchange
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The peer is unreachable by name or refused the exchange
    #[error("Peer rejected exchange: {0}")]
    PeerRejected(String),

    /// An exchange with this peer is already waiting for delivery confirmation
    #[error("Exchange already in flight with peer {0}")]
    ExchangeInProgress(String),

    /// Confirmation or abort requested without an in-flight exchange
    #[error("No exchange in flight with peer {0}")]
    NoExchangeInFlight(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Shared state could not be accessed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration problem surfaced while building an engine
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        SyncError::MalformedEntry { key: key.to_string(), reason: reason.into() }
    }

    /// True for errors caused by undecodable bytes
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            SyncError::Deserialization(_)
                | SyncError::CorruptedData(_)
                | SyncError::UnsupportedVersion(_)
        )
    }

    /// True when repeating the same exchange later is expected to help
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::ExchangeInProgress(_))
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for SyncError {
    fn from(err: crate::config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}
