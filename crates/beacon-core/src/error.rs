//! Core error types.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] beacon_storage::StorageError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid input on the public surface
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
