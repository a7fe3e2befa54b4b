//! Completion callback reconciliation.
//!
//! A caller-supplied callback fires exactly once with the terminal
//! `(status, body)` for its entry: the acknowledgment of the batch that
//! delivered it, the 413 that dropped it, the first failure report for a
//! batch that contained it, or the sentinel when no request was made at
//! all. The exactly-once guarantee lives in [`CallbackSlot`]: firing
//! consumes the callback, so a failure report followed by a successful
//! retry cannot fire twice.

/// Sentinel status for entries that never reach the network.
pub const NO_REQUEST_STATUS: u16 = 0;
/// Sentinel body for entries that never reach the network.
pub const NO_REQUEST_MESSAGE: &str = "No request sent";

/// Caller-supplied completion callback.
pub type UploadCallback = Box<dyn FnOnce(u16, String) + Send + 'static>;

/// Holder for an entry's completion callback.
///
/// Firing takes the callback out of the slot; every later fire on the
/// same slot is a no-op.
#[derive(Default)]
pub struct CallbackSlot(Option<UploadCallback>);

impl CallbackSlot {
    /// Create a slot holding `callback`.
    pub fn new(callback: Option<UploadCallback>) -> Self {
        Self(callback)
    }

    /// Create an empty slot (no caller callback attached).
    pub fn empty() -> Self {
        Self(None)
    }

    /// Whether a callback is still waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    /// Take the callback out of the slot, leaving it disarmed.
    pub fn take(&mut self) -> Option<UploadCallback> {
        self.0.take()
    }

    /// Fire with the given status and body. At most once per slot.
    pub fn fire(&mut self, status: u16, body: &str) {
        if let Some(callback) = self.0.take() {
            callback(status, body.to_string());
        }
    }

    /// Fire the sentinel for an entry that never reaches the network
    /// (opt-out active, invalid input, uninitialized client).
    pub fn fire_skipped(&mut self) {
        self.fire(NO_REQUEST_STATUS, NO_REQUEST_MESSAGE);
    }
}

impl std::fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CallbackSlot").field(&self.is_armed()).finish()
    }
}

/// Fire a set of taken callbacks with one terminal status and body.
pub fn settle(callbacks: Vec<UploadCallback>, status: u16, body: &str) {
    for callback in callbacks {
        callback(status, body.to_string());
    }
}
