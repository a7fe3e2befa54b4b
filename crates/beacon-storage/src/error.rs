//! Storage error types.

use thiserror::Error;

/// Storage error type.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid key
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;
