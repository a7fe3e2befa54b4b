//! Pipeline error types.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] beacon_storage::StorageError),

    /// Transport setup error
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
