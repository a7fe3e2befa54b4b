//! Storage trait definitions.

use crate::StorageResult;

/// Trait for durable metadata storage backends.
///
/// Values are opaque strings. Implementations may expire values; an
/// expired value reads as absent.
pub trait MetadataStore: Send + Sync {
    /// Store a value under a key.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value. Returns None for missing or expired keys.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove a value. Returns true if the key existed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists.
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
