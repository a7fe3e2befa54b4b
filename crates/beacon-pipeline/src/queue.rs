//! Unsent entry buffers.
//!
//! Two ordered buffers (events and identifies), each entry tagged with a
//! shared sequence number for cross-type ordering. Flushes read a
//! contiguous prefix snapshot; entries leave the buffers only on
//! acknowledgment or an explicit drop, so a failed upload retries the
//! same prefix.

use crate::reconciler::CallbackSlot;
use crate::{QueuedEntry, UploadCallback};
use beacon_storage::MetadataStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// An unsent entry together with its completion callback.
#[derive(Debug)]
pub struct PendingEntry {
    pub entry: QueuedEntry,
    pub callback: CallbackSlot,
}

/// A prefix snapshot handed to the transport.
///
/// The covered id boundaries identify exactly which entries the snapshot
/// contains, so the buffers can be pruned after acknowledgment even if
/// new entries arrived while the upload was in flight.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    /// Entries in delivery order (ascending sequence, legacy first).
    pub entries: Vec<QueuedEntry>,
    /// Highest event id covered, if any event is included.
    pub max_event_id: Option<u64>,
    /// Highest identify id covered, if any identify is included.
    pub max_identify_id: Option<u64>,
}

/// Ordered unsent buffers for events and identifies.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<PendingEntry>,
    identifies: Vec<PendingEntry>,
}

/// True when `a` should be delivered before `b`.
///
/// Entries without a sequence number predate sequencing and always sort
/// first; among those, events come before identifies (the merge only
/// ever asks in that orientation).
fn ordered_before(a: Option<u64>, b: Option<u64>) -> bool {
    match (a, b) {
        (None, _) => true,
        (_, None) => false,
        (Some(a), Some(b)) => a < b,
    }
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue preloaded from persisted buffers.
    pub fn from_persisted(events: Vec<QueuedEntry>, identifies: Vec<QueuedEntry>) -> Self {
        let wrap = |entries: Vec<QueuedEntry>| {
            entries
                .into_iter()
                .map(|entry| PendingEntry {
                    entry,
                    callback: CallbackSlot::empty(),
                })
                .collect()
        };
        Self {
            events: wrap(events),
            identifies: wrap(identifies),
        }
    }

    /// Total number of unsent entries across both buffers.
    pub fn unsent_count(&self) -> usize {
        self.events.len() + self.identifies.len()
    }

    /// Number of unsent event entries.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Number of unsent identify entries.
    pub fn identify_count(&self) -> usize {
        self.identifies.len()
    }

    /// Append an event entry.
    pub fn push_event(&mut self, entry: QueuedEntry, callback: Option<UploadCallback>) {
        debug!(
            event_id = entry.event_id,
            sequence = ?entry.sequence_number,
            event_type = %entry.event_type,
            "Enqueued event"
        );
        self.events.push(PendingEntry {
            entry,
            callback: CallbackSlot::new(callback),
        });
    }

    /// Append an identify entry.
    pub fn push_identify(&mut self, entry: QueuedEntry, callback: Option<UploadCallback>) {
        debug!(
            identify_id = entry.event_id,
            sequence = ?entry.sequence_number,
            event_type = %entry.event_type,
            "Enqueued identify"
        );
        self.identifies.push(PendingEntry {
            entry,
            callback: CallbackSlot::new(callback),
        });
    }

    /// Take a prefix snapshot of at most `cap` entries, interleaving the
    /// two buffers by ascending sequence number.
    pub fn snapshot(&self, cap: usize) -> BatchSnapshot {
        let mut entries = Vec::new();
        let mut max_event_id = None;
        let mut max_identify_id = None;
        let (mut i, mut j) = (0, 0);

        while entries.len() < cap && (i < self.events.len() || j < self.identifies.len()) {
            let take_event = match (self.events.get(i), self.identifies.get(j)) {
                (Some(_), None) => true,
                (None, _) => false,
                (Some(event), Some(identify)) => ordered_before(
                    event.entry.sequence_number,
                    identify.entry.sequence_number,
                ),
            };

            if take_event {
                let entry = &self.events[i].entry;
                max_event_id = Some(entry.event_id);
                entries.push(entry.clone());
                i += 1;
            } else {
                let entry = &self.identifies[j].entry;
                max_identify_id = Some(entry.event_id);
                entries.push(entry.clone());
                j += 1;
            }
        }

        BatchSnapshot {
            entries,
            max_event_id,
            max_identify_id,
        }
    }

    /// Remove every entry covered by the id boundaries and return the
    /// taken callbacks in delivery order.
    pub fn prune(
        &mut self,
        max_event_id: Option<u64>,
        max_identify_id: Option<u64>,
    ) -> Vec<UploadCallback> {
        let mut removed_events = Self::split_covered(&mut self.events, max_event_id);
        let mut removed_identifies = Self::split_covered(&mut self.identifies, max_identify_id);

        // Merge the taken callbacks back into delivery order.
        let mut callbacks = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < removed_events.len() || j < removed_identifies.len() {
            let take_event = match (removed_events.get(i), removed_identifies.get(j)) {
                (Some(_), None) => true,
                (None, _) => false,
                (Some(event), Some(identify)) => ordered_before(
                    event.entry.sequence_number,
                    identify.entry.sequence_number,
                ),
            };
            let slot = if take_event {
                i += 1;
                &mut removed_events[i - 1].callback
            } else {
                j += 1;
                &mut removed_identifies[j - 1].callback
            };
            if let Some(callback) = slot.take() {
                callbacks.push(callback);
            }
        }
        callbacks
    }

    /// Remove the single delivery-first entry (bottomed-out backoff) and
    /// return it.
    pub fn drop_first(&mut self) -> Option<PendingEntry> {
        let take_event = match (self.events.first(), self.identifies.first()) {
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
            (Some(event), Some(identify)) => ordered_before(
                event.entry.sequence_number,
                identify.entry.sequence_number,
            ),
        };
        let dropped = if take_event {
            self.events.remove(0)
        } else {
            self.identifies.remove(0)
        };
        warn!(
            event_type = %dropped.entry.event_type,
            sequence = ?dropped.entry.sequence_number,
            "Dropping oversized entry after backoff bottomed out"
        );
        Some(dropped)
    }

    /// Take the callbacks of every entry covered by the id boundaries
    /// without removing the entries. Used when a batch fails with a
    /// non-retryable status: the entries stay queued for the next organic
    /// trigger, but their callbacks receive the failure exactly once.
    pub fn take_covered_callbacks(
        &mut self,
        max_event_id: Option<u64>,
        max_identify_id: Option<u64>,
    ) -> Vec<UploadCallback> {
        let mut callbacks = Vec::new();
        for pending in self.events.iter_mut() {
            if max_event_id.is_some_and(|max| pending.entry.event_id <= max) {
                if let Some(callback) = pending.callback.take() {
                    callbacks.push(callback);
                }
            }
        }
        for pending in self.identifies.iter_mut() {
            if max_identify_id.is_some_and(|max| pending.entry.event_id <= max) {
                if let Some(callback) = pending.callback.take() {
                    callbacks.push(callback);
                }
            }
        }
        callbacks
    }

    /// Entries of both buffers, for persistence.
    pub fn persistable(&self) -> (Vec<&QueuedEntry>, Vec<&QueuedEntry>) {
        (
            self.events.iter().map(|p| &p.entry).collect(),
            self.identifies.iter().map(|p| &p.entry).collect(),
        )
    }

    fn split_covered(buffer: &mut Vec<PendingEntry>, max_id: Option<u64>) -> Vec<PendingEntry> {
        let Some(max_id) = max_id else {
            return Vec::new();
        };
        // Ids are assigned monotonically, so covered entries form a prefix.
        let split = buffer
            .iter()
            .position(|p| p.entry.event_id > max_id)
            .unwrap_or(buffer.len());
        buffer.drain(..split).collect()
    }
}

/// Persists the unsent buffers in a [`MetadataStore`].
///
/// Buffers are stored as JSON arrays under api-key-namespaced keys, with
/// a legacy unnamespaced fallback on load. Failures are logged and
/// ignored; the in-memory buffers stay authoritative.
pub struct UnsentStorage {
    store: Arc<dyn MetadataStore>,
    events_key: String,
    identifies_key: String,
    legacy_events_key: String,
    legacy_identifies_key: String,
    enabled: bool,
}

impl UnsentStorage {
    /// Create storage for one client instance.
    ///
    /// `enabled` reflects the save-events toggle; when off, persistence
    /// calls are no-ops and loads return empty buffers.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        unsent_key: &str,
        unsent_identify_key: &str,
        api_key: &str,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            events_key: format!("{unsent_key}_{api_key}"),
            identifies_key: format!("{unsent_identify_key}_{api_key}"),
            legacy_events_key: unsent_key.to_string(),
            legacy_identifies_key: unsent_identify_key.to_string(),
            enabled,
        }
    }

    /// Load both persisted buffers.
    pub fn load(&self) -> (Vec<QueuedEntry>, Vec<QueuedEntry>) {
        if !self.enabled {
            return (Vec::new(), Vec::new());
        }
        (
            self.load_buffer(&self.events_key, &self.legacy_events_key),
            self.load_buffer(&self.identifies_key, &self.legacy_identifies_key),
        )
    }

    /// Persist both buffers from the queue.
    pub fn persist(&self, queue: &EventQueue) {
        if !self.enabled {
            return;
        }
        let (events, identifies) = queue.persistable();
        self.persist_buffer(&self.events_key, &events);
        self.persist_buffer(&self.identifies_key, &identifies);
    }

    fn load_buffer(&self, key: &str, legacy_key: &str) -> Vec<QueuedEntry> {
        for key in [key, legacy_key] {
            match self.store.get(key) {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(entries) => return entries,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Discarding unreadable unsent buffer");
                        let _ = self.store.remove(key);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read unsent buffer");
                }
            }
        }
        Vec::new()
    }

    fn persist_buffer(&self, key: &str, entries: &[&QueuedEntry]) {
        let raw = match serde_json::to_string(entries) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize unsent buffer");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw) {
            warn!(key = %key, error = %e, "Failed to persist unsent buffer");
        }
    }
}
