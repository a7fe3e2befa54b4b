//! Queued entry wire format.

use beacon_core::Properties;
use serde::{Deserialize, Serialize};

/// Reserved event type for user property mutations.
pub const EVENT_TYPE_IDENTIFY: &str = "$identify";
/// Reserved event type for group property mutations.
pub const EVENT_TYPE_GROUP_IDENTIFY: &str = "$groupidentify";

/// Client library identification attached to every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub version: String,
}

impl Default for Library {
    fn default() -> Self {
        Self {
            name: "beacon-rs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Identity snapshot stamped onto an entry at enqueue time.
///
/// The optional fields honor the configured tracking options: a disabled
/// field is simply absent from the wire format.
#[derive(Debug, Clone, Default)]
pub struct EntryMetadata {
    pub device_id: String,
    pub user_id: Option<String>,
    pub session_id: i64,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub version_name: Option<String>,
}

/// One event or identify record as serialized for upload and for the
/// persisted unsent buffers.
///
/// `event_id` comes from the per-kind counter (event or identify);
/// `sequence_number` comes from the shared counter and defines cross-type
/// ordering. A missing sequence number marks an entry persisted by a
/// legacy release; such entries sort before any entry that has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEntry {
    pub event_type: String,
    pub timestamp: i64,
    pub event_id: u64,
    pub session_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub event_properties: Properties,
    #[serde(default)]
    pub user_properties: Properties,
    #[serde(default)]
    pub groups: Properties,
    #[serde(default)]
    pub group_properties: Properties,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unique per-call identifier used to match completion callbacks and
    /// deduplicate on the collector side.
    pub insert_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default)]
    pub library: Library,
}

impl QueuedEntry {
    /// Build an entry from its parts, assigning a fresh insert id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_type: impl Into<String>,
        timestamp: i64,
        event_id: u64,
        sequence_number: u64,
        metadata: EntryMetadata,
        event_properties: Properties,
        user_properties: Properties,
        groups: Properties,
        group_properties: Properties,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            event_id,
            session_id: metadata.session_id,
            sequence_number: Some(sequence_number),
            event_properties,
            user_properties,
            groups,
            group_properties,
            device_id: metadata.device_id,
            user_id: metadata.user_id,
            insert_id: uuid::Uuid::new_v4().to_string(),
            platform: metadata.platform,
            language: metadata.language,
            version_name: metadata.version_name,
            library: Library::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(event_id: u64, sequence_number: Option<u64>) -> QueuedEntry {
        let mut entry = QueuedEntry::new(
            "test",
            1000,
            event_id,
            sequence_number.unwrap_or(0),
            EntryMetadata {
                device_id: "device".to_string(),
                session_id: 1000,
                ..Default::default()
            },
            Properties::new(),
            Properties::new(),
            Properties::new(),
            Properties::new(),
        );
        entry.sequence_number = sequence_number;
        entry
    }

    #[test]
    fn test_serialization_skips_absent_sequence_number() {
        let legacy = entry(1, None);
        let value = serde_json::to_value(&legacy).unwrap();
        assert!(value.get("sequence_number").is_none());

        let current = entry(1, Some(7));
        let value = serde_json::to_value(&current).unwrap();
        assert_eq!(value["sequence_number"], json!(7));
    }

    #[test]
    fn test_legacy_entry_deserializes_without_sequence_number() {
        let raw = json!({
            "event_type": "old",
            "timestamp": 123,
            "event_id": 4,
            "session_id": 123,
            "device_id": "device",
            "insert_id": "insert-1",
        });
        let entry: QueuedEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.sequence_number, None);
        assert!(entry.event_properties.is_empty());
        assert_eq!(entry.library.name, "beacon-rs");
    }

    #[test]
    fn test_insert_ids_are_unique() {
        assert_ne!(entry(1, Some(1)).insert_id, entry(2, Some(2)).insert_id);
    }
}
