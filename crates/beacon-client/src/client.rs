//! Public client surface.
//!
//! A client starts uninitialized, capturing every call as a command.
//! `init` either constructs the real client and replays the captured
//! commands, or (with deferred initialization) keeps capturing until
//! `enable_tracking`. Tracking calls never return errors: invalid input
//! and opt-out resolve to a sentinel callback, everything else to a
//! no-op or a retry.

use crate::identify::{Identify, IdentifyInput};
use crate::replay::{Command, CommandQueue};
use crate::{ClientError, ClientResult};
use beacon_core::{sanitize_properties, Config, IdentityRecord, MetadataStorage, Properties};
use beacon_pipeline::{
    CallbackSlot, EntryMetadata, HttpTransport, Pipeline, PipelineConfig, QueuedEntry, Transport,
    UnsentStorage, UploadCallback, EVENT_TYPE_GROUP_IDENTIFY, EVENT_TYPE_IDENTIFY,
};
use beacon_storage::{FileStore, MemoryStore, MetadataStore};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// User id input at the public boundary.
///
/// Numbers are coerced to their decimal string form; `Clear` removes the
/// user id.
#[derive(Debug, Clone)]
pub enum UserIdInput {
    Clear,
    Text(String),
    Number(i64),
}

impl UserIdInput {
    fn normalize(self) -> Option<String> {
        match self {
            UserIdInput::Clear => None,
            UserIdInput::Text(s) => Some(s),
            UserIdInput::Number(n) => Some(n.to_string()),
        }
    }
}

impl From<&str> for UserIdInput {
    fn from(s: &str) -> Self {
        UserIdInput::Text(s.to_string())
    }
}

impl From<String> for UserIdInput {
    fn from(s: String) -> Self {
        UserIdInput::Text(s)
    }
}

impl From<i64> for UserIdInput {
    fn from(n: i64) -> Self {
        UserIdInput::Number(n)
    }
}

impl From<Option<String>> for UserIdInput {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(s) => UserIdInput::Text(s),
            None => UserIdInput::Clear,
        }
    }
}

enum ClientPhase {
    /// No `init` call yet: capture everything.
    Uninitialized { pending: CommandQueue },
    /// `init` was called with deferred initialization: keep capturing,
    /// with nothing persisted or sent, until tracking is enabled.
    Deferred {
        api_key: String,
        user_id: Option<String>,
        config: Config,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
        pending: CommandQueue,
    },
    Ready(ReadyClient),
}

impl ClientPhase {
    fn pending_mut(&mut self) -> Option<&mut CommandQueue> {
        match self {
            ClientPhase::Uninitialized { pending } => Some(pending),
            ClientPhase::Deferred { pending, .. } => Some(pending),
            ClientPhase::Ready(_) => None,
        }
    }
}

#[derive(Clone, Copy)]
enum EntryKind {
    Event,
    Identify,
}

/// A telemetry client instance.
pub struct BeaconClient {
    phase: Mutex<ClientPhase>,
}

impl Default for BeaconClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconClient {
    /// Create an uninitialized client. Calls made before `init` are
    /// captured and replayed in order once the client is constructed.
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(ClientPhase::Uninitialized {
                pending: CommandQueue::new(),
            }),
        }
    }

    /// Initialize against the configured collector, using the file store
    /// for persistence (falling back to in-memory storage if the file
    /// store is unavailable).
    pub async fn init(
        &self,
        api_key: &str,
        user_id: Option<&str>,
        config: Config,
    ) -> ClientResult<()> {
        let config = config.validated();
        let store: Arc<dyn MetadataStore> =
            match FileStore::new(config.storage_dir(), config.storage_expiration_days) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, "File store unavailable, continuing with in-memory storage");
                    Arc::new(MemoryStore::new())
                }
            };
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(config.upload_url()?.to_string())?);
        self.init_with_parts(api_key, user_id, config, store, transport)
            .await
    }

    /// Initialize with explicit storage and transport implementations.
    pub async fn init_with_parts(
        &self,
        api_key: &str,
        user_id: Option<&str>,
        config: Config,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<()> {
        if api_key.trim().is_empty() {
            return Err(ClientError::InvalidApiKey);
        }
        let config = config.validated();

        let mut phase = self.phase.lock().await;
        let pending = match &mut *phase {
            ClientPhase::Uninitialized { pending } => std::mem::take(pending),
            _ => return Err(ClientError::AlreadyInitialized),
        };

        if config.defer_initialization {
            info!("Initialization deferred until tracking is enabled");
            *phase = ClientPhase::Deferred {
                api_key: api_key.to_string(),
                user_id: user_id.map(str::to_string),
                config,
                store,
                transport,
                pending,
            };
            return Ok(());
        }

        *phase = ClientPhase::Ready(ReadyClient::build(
            api_key, user_id, config, store, transport,
        ));
        if let ClientPhase::Ready(ready) = &mut *phase {
            ready.replay(pending).await;
            ready.pipeline.send_if_ready().await;
        }
        Ok(())
    }

    /// Complete a deferred initialization, replaying captured commands
    /// in order. A no-op on a client that is not deferred.
    pub async fn enable_tracking(&self) {
        let mut phase = self.phase.lock().await;
        let placeholder = ClientPhase::Uninitialized {
            pending: CommandQueue::new(),
        };
        match std::mem::replace(&mut *phase, placeholder) {
            ClientPhase::Deferred {
                api_key,
                user_id,
                config,
                store,
                transport,
                pending,
            } => {
                info!("Tracking enabled, completing deferred initialization");
                *phase = ClientPhase::Ready(ReadyClient::build(
                    &api_key,
                    user_id.as_deref(),
                    config,
                    store,
                    transport,
                ));
                if let ClientPhase::Ready(ready) = &mut *phase {
                    ready.replay(pending).await;
                    ready.pipeline.send_if_ready().await;
                }
            }
            other => {
                debug!("enable_tracking on a non-deferred client is a no-op");
                *phase = other;
            }
        }
    }

    /// Log an event with the current time.
    pub async fn log_event(
        &self,
        event_type: &str,
        properties: Properties,
        callback: Option<UploadCallback>,
    ) {
        self.log_event_with_timestamp(event_type, properties, None, callback)
            .await
    }

    /// Log an event with a caller-supplied timestamp (epoch ms).
    pub async fn log_event_with_timestamp(
        &self,
        event_type: &str,
        properties: Properties,
        timestamp: Option<i64>,
        callback: Option<UploadCallback>,
    ) {
        if event_type.trim().is_empty() {
            warn!("Ignoring event with an empty event type");
            CallbackSlot::new(callback).fire_skipped();
            return;
        }
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => {
                ready
                    .log_event(event_type, properties, timestamp, callback)
                    .await
            }
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::LogEvent {
                        event_type: event_type.to_string(),
                        properties,
                        timestamp,
                        callback,
                    });
                }
            }
        }
    }

    /// Apply user property mutations as a single `$identify` entry.
    pub async fn identify(
        &self,
        input: impl Into<IdentifyInput>,
        callback: Option<UploadCallback>,
    ) {
        let Some(identify) = input.into().resolve() else {
            warn!("Ignoring malformed identify input");
            CallbackSlot::new(callback).fire_skipped();
            return;
        };
        if identify.is_empty() {
            debug!("Ignoring identify with no operations");
            CallbackSlot::new(callback).fire_skipped();
            return;
        }
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.identify(identify, callback).await,
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::Identify {
                        input: IdentifyInput::Builder(identify),
                        callback,
                    });
                }
            }
        }
    }

    /// Apply group property mutations as a single `$groupidentify` entry.
    pub async fn group_identify(
        &self,
        group_type: &str,
        group_name: Value,
        input: impl Into<IdentifyInput>,
        callback: Option<UploadCallback>,
    ) {
        if group_type.trim().is_empty() {
            warn!("Ignoring group identify with an empty group type");
            CallbackSlot::new(callback).fire_skipped();
            return;
        }
        let Some(identify) = input.into().resolve() else {
            warn!("Ignoring malformed group identify input");
            CallbackSlot::new(callback).fire_skipped();
            return;
        };
        if identify.is_empty() {
            debug!("Ignoring group identify with no operations");
            CallbackSlot::new(callback).fire_skipped();
            return;
        }
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => {
                ready
                    .group_identify(group_type, group_name, identify, callback)
                    .await
            }
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::GroupIdentify {
                        group_type: group_type.to_string(),
                        group_name,
                        input: IdentifyInput::Builder(identify),
                        callback,
                    });
                }
            }
        }
    }

    /// Set or clear the user id. Numeric ids are coerced to strings.
    pub async fn set_user_id(&self, user_id: impl Into<UserIdInput>) {
        let user_id = user_id.into().normalize();
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_user_id(user_id),
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetUserId { user_id });
                }
            }
        }
    }

    /// Set the device id. Empty values are ignored.
    pub async fn set_device_id(&self, device_id: &str) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_device_id(device_id),
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetDeviceId {
                        device_id: device_id.to_string(),
                    });
                }
            }
        }
    }

    /// Replace the device id with a fresh random one. Counters are kept.
    pub async fn regenerate_device_id(&self) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.regenerate_device_id(),
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::RegenerateDeviceId);
                }
            }
        }
    }

    /// Toggle opt-out. While set, enqueue calls are suppressed entirely.
    pub async fn set_opt_out(&self, enabled: bool) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_opt_out(enabled),
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetOptOut { enabled });
                }
            }
        }
    }

    /// Assign this user to a group, recorded as an `$identify` entry.
    pub async fn set_group(&self, group_type: &str, group_name: Value) {
        if group_type.trim().is_empty() {
            warn!("Ignoring set_group with an empty group type");
            return;
        }
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_group(group_type, group_name).await,
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetGroup {
                        group_type: group_type.to_string(),
                        group_name,
                    });
                }
            }
        }
    }

    /// Set user properties, shorthand for an identify with one `set` per
    /// property.
    pub async fn set_user_properties(&self, properties: Properties) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_user_properties(properties).await,
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetUserProperties { properties });
                }
            }
        }
    }

    /// Remove all user properties.
    pub async fn clear_user_properties(&self) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.clear_user_properties().await,
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::ClearUserProperties);
                }
            }
        }
    }

    /// Force a specific session id (epoch ms).
    pub async fn set_session_id(&self, session_id: i64) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.set_session_id(session_id),
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::SetSessionId { session_id });
                }
            }
        }
    }

    /// Flush unsent entries now.
    pub async fn flush(&self) {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            ClientPhase::Ready(ready) => ready.pipeline.flush().await,
            other => {
                if let Some(pending) = other.pending_mut() {
                    pending.record(Command::Flush);
                }
            }
        }
    }

    /// Current device id, once initialized.
    pub async fn device_id(&self) -> Option<String> {
        match &*self.phase.lock().await {
            ClientPhase::Ready(ready) => Some(ready.identity.device_id.clone()),
            _ => None,
        }
    }

    /// Current user id, once initialized and identified.
    pub async fn user_id(&self) -> Option<String> {
        match &*self.phase.lock().await {
            ClientPhase::Ready(ready) => ready.identity.user_id.clone(),
            _ => None,
        }
    }

    /// Current session id, once initialized. 0 means no session yet.
    pub async fn session_id(&self) -> Option<i64> {
        match &*self.phase.lock().await {
            ClientPhase::Ready(ready) => Some(ready.identity.session_id),
            _ => None,
        }
    }

    /// Whether opt-out is active.
    pub async fn is_opt_out(&self) -> bool {
        match &*self.phase.lock().await {
            ClientPhase::Ready(ready) => ready.identity.opt_out,
            _ => false,
        }
    }

    /// Total number of unsent entries. Before initialization this is the
    /// number of captured commands that will produce an entry on replay.
    pub async fn unsent_count(&self) -> usize {
        match &*self.phase.lock().await {
            ClientPhase::Ready(ready) => ready.pipeline.unsent_count().await,
            ClientPhase::Uninitialized { pending }
            | ClientPhase::Deferred { pending, .. } => pending.entry_count(),
        }
    }
}

struct ReadyClient {
    config: Config,
    identity: IdentityRecord,
    metadata: MetadataStorage,
    pipeline: Arc<Pipeline>,
}

impl ReadyClient {
    fn build(
        api_key: &str,
        user_id: Option<&str>,
        config: Config,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        beacon_core::init_logging(&config.log_level);
        let metadata = MetadataStorage::new(store.clone(), &config.storage_key, api_key);
        let mut identity = metadata.load().unwrap_or_default();
        if let Some(user_id) = user_id {
            identity.set_user_id(Some(user_id.to_string()));
        }
        if config.opt_out {
            identity.opt_out = true;
        }
        metadata.save(&identity);
        debug!(device_id = %identity.device_id, "Client initialized");

        let storage = UnsentStorage::new(
            store,
            &config.unsent_key,
            &config.unsent_identify_key,
            api_key,
            config.save_events,
        );
        let pipeline = Pipeline::new(api_key, PipelineConfig::from(&config), transport, storage);
        Self {
            config,
            identity,
            metadata,
            pipeline,
        }
    }

    async fn replay(&mut self, mut pending: CommandQueue) {
        let commands = pending.drain();
        if commands.is_empty() {
            return;
        }
        debug!(count = commands.len(), "Replaying captured commands");
        for command in commands {
            match command {
                Command::LogEvent {
                    event_type,
                    properties,
                    timestamp,
                    callback,
                } => {
                    self.log_event(&event_type, properties, timestamp, callback)
                        .await
                }
                Command::Identify { input, callback } => {
                    if let Some(identify) = input.resolve() {
                        self.identify(identify, callback).await;
                    } else {
                        CallbackSlot::new(callback).fire_skipped();
                    }
                }
                Command::GroupIdentify {
                    group_type,
                    group_name,
                    input,
                    callback,
                } => {
                    if let Some(identify) = input.resolve() {
                        self.group_identify(&group_type, group_name, identify, callback)
                            .await;
                    } else {
                        CallbackSlot::new(callback).fire_skipped();
                    }
                }
                Command::SetUserId { user_id } => self.set_user_id(user_id),
                Command::SetDeviceId { device_id } => self.set_device_id(&device_id),
                Command::RegenerateDeviceId => self.regenerate_device_id(),
                Command::SetOptOut { enabled } => self.set_opt_out(enabled),
                Command::SetGroup {
                    group_type,
                    group_name,
                } => self.set_group(&group_type, group_name).await,
                Command::SetUserProperties { properties } => {
                    self.set_user_properties(properties).await
                }
                Command::ClearUserProperties => self.clear_user_properties().await,
                Command::SetSessionId { session_id } => self.set_session_id(session_id),
                Command::Flush => self.pipeline.flush().await,
            }
        }
    }

    async fn log_event(
        &mut self,
        event_type: &str,
        properties: Properties,
        timestamp: Option<i64>,
        callback: Option<UploadCallback>,
    ) {
        self.record(
            EntryKind::Event,
            event_type,
            properties,
            Properties::new(),
            Properties::new(),
            Properties::new(),
            timestamp,
            callback,
        )
        .await;
    }

    async fn identify(&mut self, identify: Identify, callback: Option<UploadCallback>) {
        self.record(
            EntryKind::Identify,
            EVENT_TYPE_IDENTIFY,
            Properties::new(),
            identify.into_operations(),
            Properties::new(),
            Properties::new(),
            None,
            callback,
        )
        .await;
    }

    async fn group_identify(
        &mut self,
        group_type: &str,
        group_name: Value,
        identify: Identify,
        callback: Option<UploadCallback>,
    ) {
        let mut groups = Properties::new();
        groups.insert(group_type.to_string(), group_name);
        self.record(
            EntryKind::Identify,
            EVENT_TYPE_GROUP_IDENTIFY,
            Properties::new(),
            Properties::new(),
            groups,
            identify.into_operations(),
            None,
            callback,
        )
        .await;
    }

    fn set_user_id(&mut self, user_id: Option<String>) {
        self.identity.set_user_id(user_id);
        self.metadata.save(&self.identity);
    }

    fn set_device_id(&mut self, device_id: &str) {
        match self.identity.set_device_id(device_id) {
            Ok(()) => self.metadata.save(&self.identity),
            Err(e) => warn!(error = %e, "Ignoring invalid device id"),
        }
    }

    fn regenerate_device_id(&mut self) {
        self.identity.regenerate_device_id();
        self.metadata.save(&self.identity);
    }

    fn set_opt_out(&mut self, enabled: bool) {
        info!(enabled, "Opt-out changed");
        self.identity.opt_out = enabled;
        self.metadata.save(&self.identity);
    }

    async fn set_group(&mut self, group_type: &str, group_name: Value) {
        let identify = Identify::new().set(group_type, group_name.clone());
        let mut groups = Properties::new();
        groups.insert(group_type.to_string(), group_name);
        self.record(
            EntryKind::Identify,
            EVENT_TYPE_IDENTIFY,
            Properties::new(),
            identify.into_operations(),
            groups,
            Properties::new(),
            None,
            None,
        )
        .await;
    }

    async fn set_user_properties(&mut self, properties: Properties) {
        let identify = properties
            .into_iter()
            .fold(Identify::new(), |identify, (key, value)| {
                identify.set(&key, value)
            });
        if identify.is_empty() {
            return;
        }
        self.identify(identify, None).await;
    }

    async fn clear_user_properties(&mut self) {
        self.identify(Identify::new().clear_all(), None).await;
    }

    fn set_session_id(&mut self, session_id: i64) {
        self.identity.session_id = session_id;
        self.metadata.save(&self.identity);
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &mut self,
        kind: EntryKind,
        event_type: &str,
        event_properties: Properties,
        user_properties: Properties,
        groups: Properties,
        group_properties: Properties,
        timestamp: Option<i64>,
        callback: Option<UploadCallback>,
    ) {
        if self.identity.opt_out {
            debug!(event_type, "Opt-out active, dropping entry");
            CallbackSlot::new(callback).fire_skipped();
            return;
        }

        // Scrub properties first; ids and the session are assigned to
        // the entry as it will be delivered.
        let mut truncations = 0;
        let mut sanitize = |properties: Properties| {
            let (sanitized, truncated) = sanitize_properties(properties);
            truncations += truncated;
            sanitized
        };
        let event_properties = sanitize(event_properties);
        let user_properties = sanitize(user_properties);
        let groups = sanitize(groups);
        let group_properties = sanitize(group_properties);
        if truncations > 0 {
            warn!(truncations, event_type, "Truncated oversized property strings");
        }

        let now = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let session_id = self
            .identity
            .ensure_session(now, self.config.session_timeout_millis);
        let entry_id = match kind {
            EntryKind::Event => self.identity.next_event_id(),
            EntryKind::Identify => self.identity.next_identify_id(),
        };
        let sequence_number = self.identity.next_sequence_number();
        self.metadata.save(&self.identity);

        let options = &self.config.tracking_options;
        let metadata = EntryMetadata {
            device_id: self.identity.device_id.clone(),
            user_id: self.identity.user_id.clone(),
            session_id,
            platform: options.platform.then(|| self.config.platform.clone()),
            language: options.language.then(|| self.config.language.clone()),
            version_name: if options.version_name {
                self.config.version_name.clone()
            } else {
                None
            },
        };
        let entry = QueuedEntry::new(
            event_type,
            now,
            entry_id,
            sequence_number,
            metadata,
            event_properties,
            user_properties,
            groups,
            group_properties,
        );
        match kind {
            EntryKind::Event => self.pipeline.enqueue_event(entry, callback).await,
            EntryKind::Identify => self.pipeline.enqueue_identify(entry, callback).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_pipeline::ScriptedTransport;
    use beacon_storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn props(value: Value) -> Properties {
        value.as_object().unwrap().clone()
    }

    async fn ready_client(
        config: Config,
    ) -> (BeaconClient, Arc<ScriptedTransport>, Arc<dyn MetadataStore>) {
        let client = BeaconClient::new();
        let transport = Arc::new(ScriptedTransport::new());
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        client
            .init_with_parts("api-key", None, config, store.clone(), transport.clone())
            .await
            .unwrap();
        (client, transport, store)
    }

    #[tokio::test]
    async fn test_init_rejects_empty_api_key() {
        let client = BeaconClient::new();
        let result = client
            .init_with_parts(
                "  ",
                None,
                Config::default(),
                Arc::new(MemoryStore::new()),
                Arc::new(ScriptedTransport::new()),
            )
            .await;
        assert!(matches!(result, Err(ClientError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let (client, ..) = ready_client(Config::default()).await;
        let result = client
            .init_with_parts(
                "api-key",
                None,
                Config::default(),
                Arc::new(MemoryStore::new()),
                Arc::new(ScriptedTransport::new()),
            )
            .await;
        assert!(matches!(result, Err(ClientError::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn test_log_event_stamps_identity_and_delivers() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client
            .log_event("purchase", props(json!({"amount": 42})), None)
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let entry = &requests[0][0];
        assert_eq!(entry.event_type, "purchase");
        assert_eq!(entry.event_id, 1);
        assert_eq!(entry.sequence_number, Some(1));
        assert_eq!(entry.event_properties["amount"], json!(42));
        assert_eq!(entry.device_id, client.device_id().await.unwrap());
        assert!(entry.session_id > 0);
        assert!(entry.platform.is_some());
    }

    #[tokio::test]
    async fn test_empty_event_type_fires_sentinel() {
        let (client, transport, _) = ready_client(Config::default()).await;

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        client
            .log_event(
                "",
                Properties::new(),
                Some(Box::new(move |status, body| {
                    *seen2.lock().unwrap() = Some((status, body));
                })),
            )
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some((0, "No request sent".to_string()))
        );
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_opt_out_suppresses_and_resumes() {
        let (client, transport, _) = ready_client(Config::default()).await;
        client.set_opt_out(true).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        client
            .log_event(
                "suppressed",
                Properties::new(),
                Some(Box::new(move |status, _| {
                    assert_eq!(status, 0);
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(transport.request_count(), 0);
        assert_eq!(client.unsent_count().await, 0);

        // Clearing opt-out resumes delivery of new entries only.
        client.set_opt_out(false).await;
        transport.respond_with(200, "success");
        client.log_event("resumed", Properties::new(), None).await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].event_type, "resumed");
    }

    #[tokio::test]
    async fn test_counters_increase_across_kinds() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_times(3, 200, "success");

        client.log_event("one", Properties::new(), None).await;
        client
            .identify(Identify::new().set("plan", "pro"), None)
            .await;
        client.log_event("two", Properties::new(), None).await;

        let requests = transport.requests();
        assert_eq!(requests[0][0].event_id, 1);
        assert_eq!(requests[0][0].sequence_number, Some(1));
        assert_eq!(requests[1][0].event_id, 1); // identify counter
        assert_eq!(requests[1][0].sequence_number, Some(2));
        assert_eq!(requests[2][0].event_id, 2);
        assert_eq!(requests[2][0].sequence_number, Some(3));
    }

    #[tokio::test]
    async fn test_identity_persists_across_instances() {
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_times(2, 200, "success");

        let client = BeaconClient::new();
        client
            .init_with_parts(
                "api-key",
                None,
                Config::default(),
                store.clone(),
                transport.clone(),
            )
            .await
            .unwrap();
        client.log_event("first", Properties::new(), None).await;
        let device_id = client.device_id().await.unwrap();

        let reloaded = BeaconClient::new();
        reloaded
            .init_with_parts(
                "api-key",
                None,
                Config::default(),
                store,
                transport.clone(),
            )
            .await
            .unwrap();
        assert_eq!(reloaded.device_id().await.unwrap(), device_id);
        reloaded.log_event("second", Properties::new(), None).await;
        let requests = transport.requests();
        assert_eq!(requests[1][0].event_id, 2);
        assert_eq!(requests[1][0].sequence_number, Some(2));
    }

    #[tokio::test]
    async fn test_identify_carries_operations() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client
            .identify(Identify::new().set("plan", "pro").add("logins", 1), None)
            .await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.event_type, "$identify");
        assert_eq!(entry.user_properties["$set"], json!({"plan": "pro"}));
        assert_eq!(entry.user_properties["$add"], json!({"logins": 1}));
    }

    #[tokio::test]
    async fn test_malformed_identify_fires_sentinel() {
        let (client, transport, _) = ready_client(Config::default()).await;

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        client
            .identify(
                IdentifyInput::Invalid,
                Some(Box::new(move |status, body| {
                    *seen2.lock().unwrap() = Some((status, body));
                })),
            )
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some((0, "No request sent".to_string()))
        );
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_identify_is_ignored() {
        let (client, transport, _) = ready_client(Config::default()).await;
        client.identify(Identify::new(), None).await;
        assert_eq!(transport.request_count(), 0);
        assert_eq!(client.unsent_count().await, 0);
    }

    #[tokio::test]
    async fn test_group_identify_carries_groups() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client
            .group_identify(
                "team",
                json!("blue"),
                Identify::new().set("seats", 5),
                None,
            )
            .await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.event_type, "$groupidentify");
        assert_eq!(entry.groups["team"], json!("blue"));
        assert_eq!(entry.group_properties["$set"], json!({"seats": 5}));
    }

    #[tokio::test]
    async fn test_set_group_logs_identify_with_groups() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client.set_group("org", json!("acme")).await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.event_type, "$identify");
        assert_eq!(entry.groups["org"], json!("acme"));
        assert_eq!(entry.user_properties["$set"], json!({"org": "acme"}));
    }

    #[tokio::test]
    async fn test_set_user_properties_becomes_set_identify() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client
            .set_user_properties(props(json!({"plan": "pro", "beta": true})))
            .await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.event_type, "$identify");
        assert_eq!(
            entry.user_properties["$set"],
            json!({"plan": "pro", "beta": true})
        );
    }

    #[tokio::test]
    async fn test_clear_user_properties() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client.clear_user_properties().await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.user_properties["$clearAll"], json!("-"));
    }

    #[tokio::test]
    async fn test_numeric_user_id_coerced_to_string() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client.set_user_id(42i64).await;
        assert_eq!(client.user_id().await, Some("42".to_string()));

        client.log_event("e", Properties::new(), None).await;
        assert_eq!(
            transport.requests()[0][0].user_id,
            Some("42".to_string())
        );

        client.set_user_id(UserIdInput::Clear).await;
        assert_eq!(client.user_id().await, None);
    }

    #[tokio::test]
    async fn test_set_device_id_ignores_empty() {
        let (client, _, _) = ready_client(Config::default()).await;
        let original = client.device_id().await.unwrap();

        client.set_device_id("").await;
        assert_eq!(client.device_id().await.unwrap(), original);

        client.set_device_id("custom-device").await;
        assert_eq!(client.device_id().await.unwrap(), "custom-device");
    }

    #[tokio::test]
    async fn test_pre_init_calls_replay_in_order() {
        let client = BeaconClient::new();
        client.set_user_id("early-user").await;
        client.log_event("first", Properties::new(), None).await;
        client.log_event("second", Properties::new(), None).await;
        client.flush().await;
        // Only the two events count; SetUserId and Flush produce no entry.
        assert_eq!(client.unsent_count().await, 2);

        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_times(2, 200, "success");
        client
            .init_with_parts(
                "api-key",
                None,
                Config::default(),
                Arc::new(MemoryStore::new()),
                transport.clone(),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0][0].event_type, "first");
        assert_eq!(requests[0][0].user_id, Some("early-user".to_string()));
        assert_eq!(requests[1][0].event_type, "second");
    }

    #[tokio::test]
    async fn test_deferred_init_holds_entries_unpersisted() {
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let client = BeaconClient::new();
        client
            .init_with_parts(
                "api-key",
                None,
                Config {
                    defer_initialization: true,
                    ..Default::default()
                },
                store.clone(),
                transport.clone(),
            )
            .await
            .unwrap();

        client.log_event("held-1", Properties::new(), None).await;
        client.log_event("held-2", Properties::new(), None).await;
        assert_eq!(transport.request_count(), 0);
        // Nothing written while deferred: no identity, no unsent buffers.
        assert!(store.get("beacon_id_api-key").unwrap().is_none());
        assert!(store.get("beacon_unsent_api-key").unwrap().is_none());

        transport.respond_times(2, 200, "success");
        client.enable_tracking().await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0][0].event_type, "held-1");
        assert_eq!(requests[1][0].event_type, "held-2");
        assert!(store.get("beacon_id_api-key").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_continues_within_timeout() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_times(2, 200, "success");

        client.log_event("one", Properties::new(), None).await;
        client.log_event("two", Properties::new(), None).await;

        let requests = transport.requests();
        assert_eq!(requests[0][0].session_id, requests[1][0].session_id);
    }

    #[tokio::test]
    async fn test_set_session_id_applies_to_next_entry() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        client.set_session_id(777).await;
        assert_eq!(client.session_id().await, Some(777));
    }

    #[tokio::test]
    async fn test_config_opt_out_starts_suppressed() {
        let (client, transport, _) = ready_client(Config {
            opt_out: true,
            ..Default::default()
        })
        .await;

        assert!(client.is_opt_out().await);
        client.log_event("e", Properties::new(), None).await;
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_property_map_scrubbed_but_delivered() {
        let (client, transport, _) = ready_client(Config::default()).await;
        transport.respond_with(200, "success");

        let mut properties = Properties::new();
        for i in 0..=1000 {
            properties.insert(i.to_string(), json!(i));
        }
        client.log_event("bloated", properties, None).await;

        let entry = &transport.requests()[0][0];
        assert_eq!(entry.event_type, "bloated");
        assert!(entry.event_properties.is_empty());
        // Ids are assigned to the already-scrubbed entry.
        assert_eq!(entry.event_id, 1);
        assert_eq!(entry.sequence_number, Some(1));
    }

    #[tokio::test]
    async fn test_tracking_options_strip_fields() {
        let (client, transport, _) = ready_client(Config {
            tracking_options: beacon_core::TrackingOptions {
                platform: false,
                language: false,
                version_name: false,
            },
            ..Default::default()
        })
        .await;
        transport.respond_with(200, "success");

        client.log_event("e", Properties::new(), None).await;
        let entry = &transport.requests()[0][0];
        assert!(entry.platform.is_none());
        assert!(entry.language.is_none());
        assert!(entry.version_name.is_none());
    }
}
