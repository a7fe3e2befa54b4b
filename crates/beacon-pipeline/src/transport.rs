//! HTTP transport for batch uploads.

use crate::{PipelineError, PipelineResult, QueuedEntry};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Protocol version constant sent with every upload.
pub const API_VERSION: u32 = 2;

/// Request timeout for uploads.
const UPLOAD_TIMEOUT_SECS: u64 = 30;

/// Upload payload: fixed top-level fields plus the entry array in
/// delivery order.
#[derive(Debug, Serialize)]
pub struct UploadRequest<'a> {
    /// API key identifying the project.
    pub client: &'a str,
    /// Protocol version.
    pub v: u32,
    /// Entries, ordered as produced by the snapshot merge.
    pub e: &'a [QueuedEntry],
    /// Client-side send time, epoch ms.
    pub upload_time: i64,
}

/// Response surfaced to the backoff controller.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Seam for the HTTP call so delivery logic is testable without a
/// network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one POST of the given payload.
    async fn post(&self, request: &UploadRequest<'_>) -> PipelineResult<TransportResponse>;
}

/// Production transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport posting to `url`.
    pub fn new(url: impl Into<String>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: &UploadRequest<'_>) -> PipelineResult<TransportResponse> {
        debug!(url = %self.url, entries = request.e.len(), "Uploading batch");
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}

/// Scripted transport for tests: pops a response per call and records
/// the entries of every request it saw.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: std::sync::Mutex<std::collections::VecDeque<PipelineResult<TransportResponse>>>,
    requests: std::sync::Mutex<Vec<Vec<QueuedEntry>>>,
}

impl ScriptedTransport {
    /// Create a transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `(status, body)` response.
    pub fn respond_with(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .expect("transport poisoned")
            .push_back(Ok(TransportResponse {
                status,
                body: body.to_string(),
            }));
    }

    /// Queue `count` identical `(status, body)` responses.
    pub fn respond_times(&self, count: usize, status: u16, body: &str) {
        for _ in 0..count {
            self.respond_with(status, body);
        }
    }

    /// Queue a transport-level failure.
    pub fn fail_with(&self, message: &str) {
        self.responses
            .lock()
            .expect("transport poisoned")
            .push_back(Err(PipelineError::Transport(message.to_string())));
    }

    /// Entries of every request performed so far.
    pub fn requests(&self) -> Vec<Vec<QueuedEntry>> {
        self.requests.lock().expect("transport poisoned").clone()
    }

    /// Number of requests performed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("transport poisoned").len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, request: &UploadRequest<'_>) -> PipelineResult<TransportResponse> {
        self.requests
            .lock()
            .expect("transport poisoned")
            .push(request.e.to_vec());
        self.responses
            .lock()
            .expect("transport poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(PipelineError::Transport(
                    "no scripted response".to_string(),
                ))
            })
    }
}
