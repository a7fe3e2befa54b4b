//! File-backed metadata store.

use crate::{MetadataStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk envelope for a single value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    /// Epoch milliseconds after which the value reads as absent.
    expires_at: Option<i64>,
}

/// File-backed store: one JSON file per key under a base directory.
///
/// Values carry an expiration timestamp derived from the configured
/// retention; expired values read as absent and the file is removed
/// lazily on the next read.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    expiration_days: u32,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    ///
    /// `expiration_days` of 0 disables expiration.
    pub fn new(base_dir: impl Into<PathBuf>, expiration_days: u32) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            expiration_days,
        })
    }

    /// Base directory holding the value files.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(format!("{key}.json")))
    }

    fn expires_at(&self) -> Option<i64> {
        if self.expiration_days == 0 {
            return None;
        }
        let ttl_ms = i64::from(self.expiration_days) * 24 * 60 * 60 * 1000;
        Some(chrono::Utc::now().timestamp_millis() + ttl_ms)
    }
}

impl MetadataStore for FileStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let envelope = Envelope {
            value: value.to_string(),
            expires_at: self.expires_at(),
        };
        let content = serde_json::to_string(&envelope)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = match serde_json::from_str(&content) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Corrupt file: drop it rather than failing every read.
                debug!(key = %key, error = %e, "Removing unreadable store entry");
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        };

        if let Some(expires_at) = envelope.expires_at {
            if chrono::Utc::now().timestamp_millis() > expires_at {
                debug!(key = %key, "Store entry expired");
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        }

        Ok(Some(envelope.value))
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
