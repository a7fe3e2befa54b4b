//! Command queue for calls made before the client is constructed.
//!
//! Calls on an uninitialized or deferred client are captured as tagged
//! commands and drained in order by a single replay once the real client
//! exists. Nothing is persisted or sent while commands are queued.

use crate::identify::IdentifyInput;
use beacon_core::Properties;
use beacon_pipeline::UploadCallback;
use serde_json::Value;

/// One captured client call.
pub enum Command {
    LogEvent {
        event_type: String,
        properties: Properties,
        timestamp: Option<i64>,
        callback: Option<UploadCallback>,
    },
    Identify {
        input: IdentifyInput,
        callback: Option<UploadCallback>,
    },
    GroupIdentify {
        group_type: String,
        group_name: Value,
        input: IdentifyInput,
        callback: Option<UploadCallback>,
    },
    SetUserId {
        user_id: Option<String>,
    },
    SetDeviceId {
        device_id: String,
    },
    RegenerateDeviceId,
    SetOptOut {
        enabled: bool,
    },
    SetGroup {
        group_type: String,
        group_name: Value,
    },
    SetUserProperties {
        properties: Properties,
    },
    ClearUserProperties,
    SetSessionId {
        session_id: i64,
    },
    Flush,
}

/// Ordered buffer of captured commands.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a command for later replay.
    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Take all captured commands, in capture order.
    pub fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Number of captured commands that will produce an unsent entry on
    /// replay. State changes like `SetUserId` or `Flush` do not count.
    pub fn entry_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| {
                matches!(
                    command,
                    Command::LogEvent { .. }
                        | Command::Identify { .. }
                        | Command::GroupIdentify { .. }
                        | Command::SetGroup { .. }
                        | Command::ClearUserProperties
                ) || matches!(
                    command,
                    Command::SetUserProperties { properties } if !properties.is_empty()
                )
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
