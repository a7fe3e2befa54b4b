//! Identity and session state, and its persisted encoding.
//!
//! The record is stored as a single `.`-joined string with a fixed field
//! order. Counters use radix-32 integer encoding; the user id is base64
//! encoded so it can never collide with the delimiter. Missing trailing
//! fields decode as zero/false so older records load cleanly.

use crate::{CoreError, CoreResult};
use base64::Engine;
use beacon_storage::MetadataStore;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Length of a generated device id.
pub const DEVICE_ID_LENGTH: usize = 22;

const DEVICE_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Generate a fresh random device id.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..DEVICE_ID_LENGTH)
        .map(|_| DEVICE_ID_ALPHABET[rng.gen_range(0..DEVICE_ID_ALPHABET.len())] as char)
        .collect()
}

/// Identity and session state for one client installation.
///
/// All three counters are strictly increasing for the lifetime of the
/// record; the owner persists the record after every increment so a
/// reload reconstructs the same next value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Stable per-installation identifier.
    pub device_id: String,
    /// Current user id, if identified.
    pub user_id: Option<String>,
    /// When set, all enqueue operations are suppressed.
    pub opt_out: bool,
    /// Session id; also the session's start time in epoch ms. 0 = none.
    pub session_id: i64,
    /// Time of the last pipeline-touching call, epoch ms.
    pub last_event_time: i64,
    /// Monotonic counter for event entries.
    pub event_id: u64,
    /// Monotonic counter for identify entries.
    pub identify_id: u64,
    /// Monotonic counter shared across both entry kinds.
    pub sequence_number: u64,
}

impl IdentityRecord {
    /// Create a fresh record with a new random device id.
    pub fn new() -> Self {
        Self::with_device_id(generate_device_id())
    }

    /// Create a fresh record with a specific device id.
    pub fn with_device_id(device_id: String) -> Self {
        Self {
            device_id,
            user_id: None,
            opt_out: false,
            session_id: 0,
            last_event_time: 0,
            event_id: 0,
            identify_id: 0,
            sequence_number: 0,
        }
    }

    /// Return the current session id, starting a new session if the
    /// timeout elapsed or no session exists. Always updates
    /// `last_event_time`.
    pub fn ensure_session(&mut self, now: i64, timeout_millis: i64) -> i64 {
        if self.session_id == 0 || now - self.last_event_time > timeout_millis {
            debug!(session_id = now, "Starting new session");
            self.session_id = now;
        }
        self.last_event_time = now;
        self.session_id
    }

    /// Next event id. Increments and returns the counter.
    pub fn next_event_id(&mut self) -> u64 {
        self.event_id += 1;
        self.event_id
    }

    /// Next identify id. Increments and returns the counter.
    pub fn next_identify_id(&mut self) -> u64 {
        self.identify_id += 1;
        self.identify_id
    }

    /// Next shared sequence number. Increments and returns the counter.
    pub fn next_sequence_number(&mut self) -> u64 {
        self.sequence_number += 1;
        self.sequence_number
    }

    /// Set or clear the user id.
    pub fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    /// Set the device id. Empty values are rejected.
    pub fn set_device_id(&mut self, device_id: &str) -> CoreResult<()> {
        if device_id.is_empty() {
            return Err(CoreError::InvalidInput("empty device id".to_string()));
        }
        self.device_id = device_id.to_string();
        Ok(())
    }

    /// Replace the device id with a fresh random one. Counters are kept.
    pub fn regenerate_device_id(&mut self) {
        self.device_id = generate_device_id();
    }

    /// Encode into the persisted string form. Field order is fixed for
    /// backward compatibility.
    pub fn encode(&self) -> String {
        [
            self.device_id.clone(),
            BASE64.encode(self.user_id.as_deref().unwrap_or("")),
            if self.opt_out { "1" } else { "" }.to_string(),
            encode_radix32(self.session_id.max(0) as u64),
            encode_radix32(self.last_event_time.max(0) as u64),
            encode_radix32(self.event_id),
            encode_radix32(self.identify_id),
            encode_radix32(self.sequence_number),
        ]
        .join(".")
    }

    /// Decode from the persisted string form. Missing trailing fields
    /// decode as zero/false; an undecodable user id decodes as None.
    pub fn decode(raw: &str) -> Option<Self> {
        let values: Vec<&str> = raw.split('.').collect();
        let device_id = values.first()?.to_string();
        if device_id.is_empty() {
            return None;
        }

        let user_id = values
            .get(1)
            .filter(|v| !v.is_empty())
            .and_then(|v| BASE64.decode(v).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok());

        Some(Self {
            device_id,
            user_id,
            opt_out: values.get(2).copied() == Some("1"),
            session_id: decode_radix32(values.get(3).copied().unwrap_or("0")) as i64,
            last_event_time: decode_radix32(values.get(4).copied().unwrap_or("0")) as i64,
            event_id: decode_radix32(values.get(5).copied().unwrap_or("0")),
            identify_id: decode_radix32(values.get(6).copied().unwrap_or("0")),
            sequence_number: decode_radix32(values.get(7).copied().unwrap_or("0")),
        })
    }
}

impl Default for IdentityRecord {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_radix32(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    String::from_utf8(out).expect("radix digits are ascii")
}

fn decode_radix32(s: &str) -> u64 {
    u64::from_str_radix(s, 32).unwrap_or(0)
}

/// Persists the identity record in a [`MetadataStore`].
///
/// The primary key is namespaced by api key; loading falls back to the
/// legacy unnamespaced key so records written by older releases migrate
/// on first save.
pub struct MetadataStorage {
    store: Arc<dyn MetadataStore>,
    primary_key: String,
    legacy_key: String,
}

impl MetadataStorage {
    /// Create a storage wrapper for one client instance.
    pub fn new(store: Arc<dyn MetadataStore>, storage_key: &str, api_key: &str) -> Self {
        Self {
            store,
            primary_key: format!("{storage_key}_{api_key}"),
            legacy_key: storage_key.to_string(),
        }
    }

    /// Load the persisted record, trying the namespaced key first and
    /// the legacy unnamespaced key second.
    pub fn load(&self) -> Option<IdentityRecord> {
        for key in [&self.primary_key, &self.legacy_key] {
            match self.store.get(key) {
                Ok(Some(raw)) => {
                    if let Some(record) = IdentityRecord::decode(&raw) {
                        return Some(record);
                    }
                    warn!(key = %key, "Discarding undecodable identity record");
                }
                Ok(None) => {}
                Err(e) => {
                    // Storage failure is non-fatal: fall through to defaults.
                    warn!(key = %key, error = %e, "Failed to read identity record");
                }
            }
        }
        None
    }

    /// Persist the record. Failures are logged and ignored; in-memory
    /// state stays authoritative.
    pub fn save(&self, record: &IdentityRecord) {
        if let Err(e) = self.store.set(&self.primary_key, &record.encode()) {
            warn!(error = %e, "Failed to persist identity record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_storage::MemoryStore;

    #[test]
    fn test_generate_device_id_length_and_alphabet() {
        let id = generate_device_id();
        assert_eq!(id.len(), DEVICE_ID_LENGTH);
        assert!(id
            .bytes()
            .all(|b| DEVICE_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut record = IdentityRecord::with_device_id("device-abc".to_string());
        record.user_id = Some("user@example.com".to_string());
        record.opt_out = true;
        record.session_id = 1_700_000_000_123;
        record.last_event_time = 1_700_000_050_456;
        record.event_id = 41;
        record.identify_id = 7;
        record.sequence_number = 48;

        let decoded = IdentityRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_missing_trailing_fields() {
        // Only device id and user id present, as older releases wrote.
        let decoded = IdentityRecord::decode("device-abc.").unwrap();
        assert_eq!(decoded.device_id, "device-abc");
        assert_eq!(decoded.user_id, None);
        assert!(!decoded.opt_out);
        assert_eq!(decoded.session_id, 0);
        assert_eq!(decoded.event_id, 0);
        assert_eq!(decoded.sequence_number, 0);
    }

    #[test]
    fn test_decode_malformed_user_id() {
        let decoded = IdentityRecord::decode("device.!!!notbase64!!!.1.0.0.0.0.0").unwrap();
        assert_eq!(decoded.user_id, None);
        assert!(decoded.opt_out);
    }

    #[test]
    fn test_decode_empty_string_is_none() {
        assert!(IdentityRecord::decode("").is_none());
    }

    #[test]
    fn test_radix32_counters() {
        assert_eq!(encode_radix32(0), "0");
        assert_eq!(encode_radix32(31), "v");
        assert_eq!(encode_radix32(32), "10");
        assert_eq!(decode_radix32("v"), 31);
        assert_eq!(decode_radix32("10"), 32);
        assert_eq!(decode_radix32("garbage!"), 0);
    }

    #[test]
    fn test_counters_strictly_increasing() {
        let mut record = IdentityRecord::new();
        assert_eq!(record.next_event_id(), 1);
        assert_eq!(record.next_event_id(), 2);
        assert_eq!(record.next_identify_id(), 1);
        assert_eq!(record.next_sequence_number(), 1);
        assert_eq!(record.next_sequence_number(), 2);
        assert_eq!(record.next_sequence_number(), 3);
    }

    #[test]
    fn test_reload_reconstructs_next_value() {
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let storage = MetadataStorage::new(store.clone(), "beacon_id", "key1");

        let mut record = IdentityRecord::new();
        record.next_event_id();
        record.next_sequence_number();
        record.next_sequence_number();
        storage.save(&record);

        let mut reloaded = MetadataStorage::new(store, "beacon_id", "key1")
            .load()
            .unwrap();
        assert_eq!(reloaded.next_event_id(), 2);
        assert_eq!(reloaded.next_sequence_number(), 3);
    }

    #[test]
    fn test_ensure_session_new_and_continued() {
        let mut record = IdentityRecord::new();
        let timeout = 30 * 60 * 1000;

        // No session yet: start one.
        assert_eq!(record.ensure_session(1000, timeout), 1000);
        // Within the timeout: same session, activity time updated.
        assert_eq!(record.ensure_session(2000, timeout), 1000);
        assert_eq!(record.last_event_time, 2000);
        // Past the timeout: new session.
        let later = 2000 + timeout + 1;
        assert_eq!(record.ensure_session(later, timeout), later);
    }

    #[test]
    fn test_regenerate_device_id_keeps_counters() {
        let mut record = IdentityRecord::new();
        record.next_event_id();
        record.next_sequence_number();
        let old_device = record.device_id.clone();

        record.regenerate_device_id();
        assert_ne!(record.device_id, old_device);
        assert_eq!(record.event_id, 1);
        assert_eq!(record.sequence_number, 1);
    }

    #[test]
    fn test_set_device_id_rejects_empty() {
        let mut record = IdentityRecord::new();
        assert!(record.set_device_id("").is_err());
        assert!(record.set_device_id("new-device").is_ok());
        assert_eq!(record.device_id, "new-device");
    }

    #[test]
    fn test_legacy_key_migration() {
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let record = IdentityRecord::with_device_id("legacy-device".to_string());
        store.set("beacon_id", &record.encode()).unwrap();

        let storage = MetadataStorage::new(store.clone(), "beacon_id", "key1");
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.device_id, "legacy-device");

        // Saving writes the namespaced key; subsequent loads prefer it.
        storage.save(&loaded);
        assert!(store.get("beacon_id_key1").unwrap().is_some());
    }
}
