//! Storage error types

use thiserror::Error;

/// Fault raised by a storage medium or by the adapter's own checks
#[derive(Debug, Error)]
pub enum StorageFault {
    #[error("Data size ({size} bytes) exceeds storage limit of {limit} bytes")]
    QuotaExceeded { size: usize, limit: usize },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode stored data: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageFault {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// The one error a caller of `save` must be prepared to handle
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to persist chat data: {0}")]
    PersistFailed(#[from] StorageFault),
}
