use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by client construction.
///
/// Tracking calls themselves never return errors; every failure mode on
/// that surface resolves to a no-op or a callback with a sentinel status.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API key must be a non-empty string")]
    InvalidApiKey,

    #[error("client is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Core(#[from] beacon_core::CoreError),

    #[error(transparent)]
    Pipeline(#[from] beacon_pipeline::PipelineError),
}
