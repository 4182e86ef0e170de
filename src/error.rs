//! Error types for the photo worker
//!
//! The taxonomy mirrors the failure modes of the pipeline: broker
//! connectivity, missing/corrupt originals, per-size storage failures,
//! index updates and scratch-file cleanup.

use crate::models::SizeLabel;
use thiserror::Error;

/// Result type for photo-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Broker connection or channel failure; handled by the connector's
    /// reconnect loop, never surfaced to callers.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The requested blob id does not exist in the store
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// The original bytes could not be decoded as an image
    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    /// A variant upload failed for a single size step
    #[error("blob write failed for size {size}: {message}")]
    BlobWriteFailure { size: SizeLabel, message: String },

    /// The size index could not be updated; the variant blob is left
    /// stored but unindexed.
    #[error("size index update failed: {0}")]
    IndexUpdateFailure(String),

    /// A scratch file could not be removed after a size step
    #[error("scratch cleanup failed: {0}")]
    ScratchCleanupFailure(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem I/O error (scratch spool)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<lapin::Error> for AppError {
    fn from(err: lapin::Error) -> Self {
        AppError::BrokerUnavailable(err.to_string())
    }
}

impl AppError {
    /// Whether retrying the message could possibly succeed.
    ///
    /// Corrupt bytes and missing originals cannot be fixed by
    /// redelivery; those go straight to the dead-letter queue.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::BlobNotFound(_) | AppError::DecodeFailure(_)
        )
    }
}
