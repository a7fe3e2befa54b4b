//! Named client instances.
//!
//! The registry is an explicit object owned by the application entry
//! point, not process-global state. Names are case-insensitive; an
//! instance is created on first lookup and lives for the registry's
//! lifetime.

use crate::BeaconClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name used when no instance name is given.
pub const DEFAULT_INSTANCE_NAME: &str = "$default_instance";

/// Registry of named client instances.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Arc<BeaconClient>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an instance by name, creating it on first use. `None` or
    /// a blank name maps to the default instance.
    pub fn instance(&self, name: Option<&str>) -> Arc<BeaconClient> {
        let name = normalize_name(name);
        self.instances
            .lock()
            .expect("registry poisoned")
            .entry(name)
            .or_insert_with(|| Arc::new(BeaconClient::new()))
            .clone()
    }

    /// Names of all instances created so far.
    pub fn names(&self) -> Vec<String> {
        self.instances
            .lock()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

fn normalize_name(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.to_lowercase(),
        _ => DEFAULT_INSTANCE_NAME.to_string(),
    }
}
