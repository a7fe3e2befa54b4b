//! Flush scheduling and adaptive delivery.
//!
//! All queue mutation happens under one state lock; a single `sending`
//! flag guarantees at most one in-flight upload. The only suspension
//! points are the network round trip and the debounced flush timer, and
//! the flag is cleared under the same lock as the decision that ends
//! the send loop, on every exit path including transport errors.

use crate::queue::{EventQueue, UnsentStorage};
use crate::reconciler::settle;
use crate::transport::{Transport, TransportResponse, UploadRequest, API_VERSION};
use crate::{QueuedEntry, UploadCallback};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Delivery configuration, derived from the client config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Batched mode: debounce uploads instead of flushing per enqueue.
    pub batch_events: bool,
    /// Unsent-count threshold that triggers a flush in batched mode.
    pub event_upload_threshold: usize,
    /// Delay before a debounced flush, in milliseconds.
    pub event_upload_period_millis: u64,
    /// Nominal batch size cap per upload.
    pub upload_batch_size: usize,
}

impl From<&beacon_core::Config> for PipelineConfig {
    fn from(config: &beacon_core::Config) -> Self {
        Self {
            batch_events: config.batch_events,
            event_upload_threshold: config.event_upload_threshold,
            event_upload_period_millis: config.event_upload_period_millis,
            upload_batch_size: config.upload_batch_size,
        }
    }
}

struct PipelineState {
    queue: EventQueue,
    /// In-flight upload gate. Checked before every flush attempt and
    /// cleared only when the attempt fully resolves.
    sending: bool,
    /// Whether a delayed flush is already armed. Arming is idempotent;
    /// there is no cancellation.
    timer_armed: bool,
    /// Effective batch size cap, halved by 413 backoff and restored to
    /// the nominal value on success.
    batch_cap: usize,
}

/// The delivery pipeline: queue, scheduler, and backoff controller.
pub struct Pipeline {
    config: PipelineConfig,
    api_key: String,
    transport: Arc<dyn Transport>,
    storage: UnsentStorage,
    state: Mutex<PipelineState>,
    /// Handle to self for the spawned flush timer.
    this: Weak<Pipeline>,
}

impl Pipeline {
    /// Create a pipeline, loading any persisted unsent buffers.
    pub fn new(
        api_key: impl Into<String>,
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        storage: UnsentStorage,
    ) -> Arc<Self> {
        let (events, identifies) = storage.load();
        let queue = EventQueue::from_persisted(events, identifies);
        if queue.unsent_count() > 0 {
            info!(count = queue.unsent_count(), "Restored unsent entries");
        }
        let batch_cap = config.upload_batch_size;
        let api_key = api_key.into();
        Arc::new_cyclic(|this| Self {
            config,
            api_key,
            transport,
            storage,
            state: Mutex::new(PipelineState {
                queue,
                sending: false,
                timer_armed: false,
                batch_cap,
            }),
            this: this.clone(),
        })
    }

    /// Total number of unsent entries.
    pub async fn unsent_count(&self) -> usize {
        self.state.lock().await.queue.unsent_count()
    }

    /// Number of unsent event entries.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.queue.event_count()
    }

    /// Number of unsent identify entries.
    pub async fn identify_count(&self) -> usize {
        self.state.lock().await.queue.identify_count()
    }

    /// Append an event entry, persist, and apply the flush policy.
    pub async fn enqueue_event(
        &self,
        entry: QueuedEntry,
        callback: Option<UploadCallback>,
    ) {
        {
            let mut state = self.state.lock().await;
            state.queue.push_event(entry, callback);
            self.storage.persist(&state.queue);
        }
        self.send_if_ready().await;
    }

    /// Append an identify entry, persist, and apply the flush policy.
    pub async fn enqueue_identify(
        &self,
        entry: QueuedEntry,
        callback: Option<UploadCallback>,
    ) {
        {
            let mut state = self.state.lock().await;
            state.queue.push_identify(entry, callback);
            self.storage.persist(&state.queue);
        }
        self.send_if_ready().await;
    }

    /// Apply the flush policy: immediate mode flushes right away,
    /// batched mode flushes at the threshold and otherwise arms the
    /// delayed flush.
    pub async fn send_if_ready(&self) {
        let flush_now = {
            let mut state = self.state.lock().await;
            if state.queue.unsent_count() == 0 {
                return;
            }
            if !self.config.batch_events {
                true
            } else if state.queue.unsent_count() >= self.config.event_upload_threshold {
                true
            } else {
                self.arm_timer(&mut state);
                false
            }
        };
        if flush_now {
            self.flush().await;
        }
    }

    /// Flush now, unless an upload is already in flight.
    pub async fn flush(&self) {
        {
            let mut state = self.state.lock().await;
            if state.sending || state.queue.unsent_count() == 0 {
                return;
            }
            state.sending = true;
        }
        self.send_loop().await;
    }

    /// Upload snapshots until the queue drains, the policy defers, or a
    /// non-retryable failure stops delivery.
    ///
    /// The `sending` flag is cleared under the same lock as the decision
    /// that ends the loop: an enqueue racing the completion either makes
    /// the next snapshot non-empty and joins this flush, or observes the
    /// cleared flag and starts its own.
    async fn send_loop(&self) {
        loop {
            let snapshot = {
                let mut state = self.state.lock().await;
                let snapshot = state.queue.snapshot(state.batch_cap);
                if snapshot.entries.is_empty() {
                    state.sending = false;
                    return;
                }
                snapshot
            };

            let request = UploadRequest {
                client: &self.api_key,
                v: API_VERSION,
                e: &snapshot.entries,
                upload_time: chrono::Utc::now().timestamp_millis(),
            };
            let response = self.transport.post(&request).await;

            match response {
                Ok(TransportResponse { status: 200, body }) => {
                    let (callbacks, remaining) = {
                        let mut state = self.state.lock().await;
                        let callbacks = state
                            .queue
                            .prune(snapshot.max_event_id, snapshot.max_identify_id);
                        self.storage.persist(&state.queue);
                        state.batch_cap = self.config.upload_batch_size;
                        (callbacks, state.queue.unsent_count())
                    };
                    info!(
                        delivered = snapshot.entries.len(),
                        remaining, "Batch delivered"
                    );
                    settle(callbacks, 200, &body);

                    if !self.config.batch_events {
                        continue;
                    }
                    // Batched mode: re-check the count under the lock so
                    // an enqueue racing this completion is either folded
                    // into the loop or covered by the timer.
                    let mut state = self.state.lock().await;
                    let unsent = state.queue.unsent_count();
                    if unsent >= self.config.event_upload_threshold {
                        drop(state);
                        continue;
                    }
                    state.sending = false;
                    if unsent > 0 {
                        self.arm_timer(&mut state);
                    }
                    return;
                }
                Ok(TransportResponse { status: 413, body }) => {
                    let dropped = {
                        let mut state = self.state.lock().await;
                        if state.batch_cap > 1 {
                            state.batch_cap /= 2;
                            warn!(cap = state.batch_cap, "Payload too large, halving batch cap");
                            None
                        } else {
                            // A single entry the collector refuses can
                            // never be delivered; drop it and move on.
                            let dropped = state.queue.drop_first();
                            self.storage.persist(&state.queue);
                            dropped
                        }
                    };
                    if let Some(mut dropped) = dropped {
                        dropped.callback.fire(413, &body);
                    }
                    continue;
                }
                Ok(TransportResponse { status, body }) => {
                    let callbacks = {
                        let mut state = self.state.lock().await;
                        let callbacks = state
                            .queue
                            .take_covered_callbacks(snapshot.max_event_id, snapshot.max_identify_id);
                        state.sending = false;
                        callbacks
                    };
                    warn!(status, "Upload failed, leaving queue for retry");
                    settle(callbacks, status, &body);
                    return;
                }
                Err(e) => {
                    let callbacks = {
                        let mut state = self.state.lock().await;
                        let callbacks = state
                            .queue
                            .take_covered_callbacks(snapshot.max_event_id, snapshot.max_identify_id);
                        state.sending = false;
                        callbacks
                    };
                    warn!(error = %e, "Transport error, leaving queue for retry");
                    settle(callbacks, 0, &e.to_string());
                    return;
                }
            }
        }
    }

    /// Arm the delayed flush. A no-op while one is already armed.
    fn arm_timer(&self, state: &mut PipelineState) {
        if state.timer_armed {
            return;
        }
        state.timer_armed = true;
        debug!(
            delay_ms = self.config.event_upload_period_millis,
            "Arming delayed flush"
        );
        let Some(pipeline) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(
                pipeline.config.event_upload_period_millis,
            ))
            .await;
            pipeline.state.lock().await.timer_armed = false;
            pipeline.flush().await;
        });
    }
}
