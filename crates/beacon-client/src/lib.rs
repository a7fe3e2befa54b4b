//! Public client surface for the Beacon telemetry pipeline.
//!
//! This crate provides:
//! - BeaconClient: the tracking call surface, with pre-initialization
//!   command capture and deferred (consent-gated) initialization
//! - Identify: the builder for user/group property mutations
//! - InstanceRegistry: named client instances

mod client;
mod error;
mod identify;
mod registry;
mod replay;

pub use client::{BeaconClient, UserIdInput};
pub use error::{ClientError, ClientResult};
pub use identify::{
    Identify, IdentifyInput, IdentifyOp, OP_ADD, OP_CLEAR_ALL, OP_PREPEND, OP_SET, OP_SET_ONCE,
    OP_UNSET,
};
pub use registry::{InstanceRegistry, DEFAULT_INSTANCE_NAME};
pub use replay::{Command, CommandQueue};

pub use beacon_core::{init_logging, Config, Properties, TrackingOptions};
pub use beacon_pipeline::UploadCallback;
