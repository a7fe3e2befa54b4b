//! Identify builder and its input boundary.

use beacon_core::Properties;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

pub const OP_SET: &str = "$set";
pub const OP_SET_ONCE: &str = "$setOnce";
pub const OP_UNSET: &str = "$unset";
pub const OP_ADD: &str = "$add";
pub const OP_PREPEND: &str = "$prepend";
pub const OP_CLEAR_ALL: &str = "$clearAll";

/// Placeholder value for operations that carry no real payload.
const NO_VALUE: &str = "-";

/// Builder for user or group property mutations.
///
/// Each property may appear in at most one operation per builder;
/// `clear_all` is exclusive with every other operation. Violations are
/// logged and ignored, leaving the builder unchanged.
#[derive(Debug, Clone, Default)]
pub struct Identify {
    operations: Properties,
    touched: HashSet<String>,
}

impl Identify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property to a value.
    pub fn set(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.apply_to(OP_SET, property, value.into());
        self
    }

    /// Set a property only if it has no value yet.
    pub fn set_once(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.apply_to(OP_SET_ONCE, property, value.into());
        self
    }

    /// Remove a property.
    pub fn unset(mut self, property: &str) -> Self {
        self.apply_to(OP_UNSET, property, Value::String(NO_VALUE.to_string()));
        self
    }

    /// Add a numeric amount to a property.
    pub fn add(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.apply_to(OP_ADD, property, value.into());
        self
    }

    /// Prepend a value to a list property.
    pub fn prepend(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.apply_to(OP_PREPEND, property, value.into());
        self
    }

    /// Remove all properties. Exclusive with every other operation.
    pub fn clear_all(mut self) -> Self {
        if !self.operations.is_empty() {
            warn!("clear_all ignored: this identify already has operations");
            return self;
        }
        self.operations
            .insert(OP_CLEAR_ALL.to_string(), Value::String(NO_VALUE.to_string()));
        self
    }

    /// Replay one recorded operation.
    pub fn apply(self, op: IdentifyOp) -> Self {
        match op {
            IdentifyOp::Set { property, value } => self.set(&property, value),
            IdentifyOp::SetOnce { property, value } => self.set_once(&property, value),
            IdentifyOp::Unset { property } => self.unset(&property),
            IdentifyOp::Add { property, value } => self.add(&property, value),
            IdentifyOp::Prepend { property, value } => self.prepend(&property, value),
            IdentifyOp::ClearAll => self.clear_all(),
        }
    }

    /// Whether no operation has been recorded.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The accumulated operations map, keyed by operation name.
    pub fn into_operations(self) -> Properties {
        self.operations
    }

    fn apply_to(&mut self, op: &str, property: &str, value: Value) {
        if self.operations.contains_key(OP_CLEAR_ALL) {
            warn!(op, property, "Operation ignored: clear_all is already set");
            return;
        }
        if !self.touched.insert(property.to_string()) {
            warn!(
                op,
                property, "Operation ignored: property already used in this identify"
            );
            return;
        }
        let bucket = self
            .operations
            .entry(op.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = bucket {
            map.insert(property.to_string(), value);
        }
    }
}

/// One recorded identify operation, as captured before the client is
/// constructed and replayed afterwards.
#[derive(Debug, Clone)]
pub enum IdentifyOp {
    Set { property: String, value: Value },
    SetOnce { property: String, value: Value },
    Unset { property: String },
    Add { property: String, value: Value },
    Prepend { property: String, value: Value },
    ClearAll,
}

/// Input accepted at the identify boundary.
///
/// The variant is decided by the caller's type, never by probing the
/// value's shape. `Invalid` marks input with no identify interpretation;
/// it resolves to nothing and the call becomes a sentinel callback.
pub enum IdentifyInput {
    /// A completed builder.
    Builder(Identify),
    /// Operations recorded before the client existed.
    Recorded(Vec<IdentifyOp>),
    /// Input with no identify interpretation.
    Invalid,
}

impl IdentifyInput {
    /// Resolve the input to a builder, replaying recorded operations in
    /// order. `Invalid` resolves to `None`.
    pub fn resolve(self) -> Option<Identify> {
        match self {
            IdentifyInput::Builder(identify) => Some(identify),
            IdentifyInput::Recorded(ops) => {
                Some(ops.into_iter().fold(Identify::new(), Identify::apply))
            }
            IdentifyInput::Invalid => None,
        }
    }
}

impl From<Identify> for IdentifyInput {
    fn from(identify: Identify) -> Self {
        IdentifyInput::Builder(identify)
    }
}

impl From<Vec<IdentifyOp>> for IdentifyInput {
    fn from(ops: Vec<IdentifyOp>) -> Self {
        IdentifyInput::Recorded(ops)
    }
}
