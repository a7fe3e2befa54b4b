//! Durable key-value storage for telemetry metadata.
//!
//! This crate provides:
//! - MetadataStore: trait for string-keyed blob storage with expiration
//! - MemoryStore: in-memory implementation for tests and ephemeral clients
//! - FileStore: one-file-per-key implementation backed by JSON envelopes
//!
//! Storage is best-effort by design: callers treat every failure as
//! non-fatal and keep operating on in-memory state.

mod error;
mod file;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::MetadataStore;
