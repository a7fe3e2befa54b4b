//! Core types for the Beacon telemetry client.
//!
//! This crate provides:
//! - Config: validated client configuration with defaults
//! - IdentityRecord / MetadataStorage: the persisted identity and session
//!   state, including its delimiter-joined string encoding
//! - sanitize_properties: the closed-variant recursive property sanitizer
//! - logging initialization helpers

mod config;
mod error;
mod logging;
mod metadata;
mod value;

pub use config::{Config, TrackingOptions, DEFAULT_API_ENDPOINT, DEFAULT_UPLOAD_BATCH_SIZE};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use metadata::{generate_device_id, IdentityRecord, MetadataStorage, DEVICE_ID_LENGTH};
pub use value::{
    sanitize_properties, sanitize_value, Properties, MAX_DEPTH, MAX_PROPERTY_KEYS,
    MAX_STRING_LENGTH,
};
