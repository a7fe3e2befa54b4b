//! Property sanitization.
//!
//! Properties are a closed value variant (null/bool/number/string/array/
//! map), represented as `serde_json::Value`. Sanitization is a pure
//! recursive pass with explicit depth and key-count limits; it returns the
//! sanitized value together with the number of string truncations it
//! performed.

use serde_json::{Map, Value};
use tracing::warn;

/// Maximum length of a string property value, in characters.
pub const MAX_STRING_LENGTH: usize = 4096;
/// Maximum number of distinct keys per property map.
pub const MAX_PROPERTY_KEYS: usize = 1000;
/// Maximum nesting depth; values below this are dropped.
pub const MAX_DEPTH: usize = 16;

/// A property bag attached to an entry.
pub type Properties = Map<String, Value>;

/// Sanitize a property map.
///
/// A map with more than [`MAX_PROPERTY_KEYS`] distinct keys is replaced
/// by an empty map; the owning entry is still enqueued. Returns the
/// sanitized map and the number of truncated strings.
pub fn sanitize_properties(properties: Properties) -> (Properties, usize) {
    let mut truncations = 0;
    let sanitized = sanitize_map(properties, 0, &mut truncations);
    (sanitized, truncations)
}

/// Sanitize a single value at the top level.
///
/// Returns None when the value has no sanitized form (null, or nesting
/// beyond the depth limit).
pub fn sanitize_value(value: Value) -> (Option<Value>, usize) {
    let mut truncations = 0;
    let sanitized = sanitize_inner(value, 0, false, &mut truncations);
    (sanitized, truncations)
}

fn sanitize_map(map: Properties, depth: usize, truncations: &mut usize) -> Properties {
    if map.len() > MAX_PROPERTY_KEYS {
        warn!(
            keys = map.len(),
            limit = MAX_PROPERTY_KEYS,
            "Property map exceeds key limit, replacing with empty map"
        );
        return Properties::new();
    }

    let mut out = Properties::new();
    for (key, value) in map {
        if let Some(value) = sanitize_inner(value, depth + 1, false, truncations) {
            out.insert(key, value);
        }
    }
    out
}

fn sanitize_inner(
    value: Value,
    depth: usize,
    inside_array: bool,
    truncations: &mut usize,
) -> Option<Value> {
    if depth > MAX_DEPTH {
        warn!(limit = MAX_DEPTH, "Property nesting too deep, dropping value");
        return None;
    }

    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Value::Bool(b)),
        Value::Number(n) => Some(Value::Number(n)),
        Value::String(s) => Some(Value::String(truncate(s, truncations))),
        // Arrays directly inside arrays are dropped.
        Value::Array(_) if inside_array => None,
        Value::Array(items) => {
            let sanitized: Vec<Value> = items
                .into_iter()
                .filter_map(|item| sanitize_inner(item, depth + 1, true, truncations))
                .collect();
            Some(Value::Array(sanitized))
        }
        Value::Object(map) => Some(Value::Object(sanitize_map(map, depth, truncations))),
    }
}

fn truncate(s: String, truncations: &mut usize) -> String {
    if s.chars().count() <= MAX_STRING_LENGTH {
        return s;
    }
    *truncations += 1;
    s.chars().take(MAX_STRING_LENGTH).collect()
}
