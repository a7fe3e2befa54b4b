//! Event buffering and delivery pipeline.
//!
//! This crate provides:
//! - EventQueue: ordered unsent buffers with cross-type sequencing
//! - Pipeline: flush scheduling, the single in-flight upload gate, and
//!   size-based backoff against the collector
//! - Transport: HTTP seam (reqwest implementation plus a scripted
//!   implementation for tests)
//! - CallbackSlot: exactly-once completion callbacks

mod entry;
mod error;
mod pipeline;
mod queue;
mod reconciler;
mod transport;

pub use entry::{EntryMetadata, Library, QueuedEntry, EVENT_TYPE_GROUP_IDENTIFY, EVENT_TYPE_IDENTIFY};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineConfig};
pub use queue::{BatchSnapshot, EventQueue, PendingEntry, UnsentStorage};
pub use reconciler::{
    settle, CallbackSlot, UploadCallback, NO_REQUEST_MESSAGE, NO_REQUEST_STATUS,
};
pub use transport::{
    HttpTransport, ScriptedTransport, Transport, TransportResponse, UploadRequest, API_VERSION,
};
