//! In-memory metadata store.

use crate::{MetadataStore, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory store for tests and clients with persistence disabled.
///
/// Values never expire; the store lives exactly as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().expect("store poisoned").len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for MemoryStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .lock()
            .expect("store poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.lock().expect("store poisoned").get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self
            .values
            .lock()
            .expect("store poisoned")
            .remove(key)
            .is_some())
    }
}
