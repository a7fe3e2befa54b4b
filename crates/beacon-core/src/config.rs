//! Client configuration.

use crate::CoreResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use url::Url;

/// Default collector endpoint host.
pub const DEFAULT_API_ENDPOINT: &str = "api.beacon.dev";
/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "warn";
/// Default unsent-count threshold that triggers a flush in batched mode.
pub const DEFAULT_UPLOAD_THRESHOLD: usize = 30;
/// Default delay before a debounced flush in batched mode.
pub const DEFAULT_UPLOAD_PERIOD_MILLIS: u64 = 30 * 1000;
/// Default nominal batch size cap.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 100;
/// Default session timeout.
pub const DEFAULT_SESSION_TIMEOUT_MILLIS: i64 = 30 * 60 * 1000;
/// Default retention for persisted metadata, in days.
pub const DEFAULT_STORAGE_EXPIRATION_DAYS: u32 = 365 * 10;

/// Per-field toggles for metadata attached to outgoing entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingOptions {
    /// Attach the platform name to each entry.
    pub platform: bool,
    /// Attach the language tag to each entry.
    pub language: bool,
    /// Attach the application version to each entry.
    pub version_name: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            platform: true,
            language: true,
            version_name: true,
        }
    }
}

/// Main client configuration.
///
/// Every field has a working default; [`Config::validated`] replaces
/// out-of-range values with the defaults instead of failing, so
/// configuration can never prevent the client from starting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Collector endpoint host (no scheme).
    pub api_endpoint: String,
    /// Use https for uploads. When off, plain http is used.
    pub force_https: bool,
    /// Batched mode: debounce uploads instead of flushing per enqueue.
    pub batch_events: bool,
    /// Unsent-count threshold that triggers a flush in batched mode.
    pub event_upload_threshold: usize,
    /// Delay before a debounced flush in batched mode, in milliseconds.
    pub event_upload_period_millis: u64,
    /// Nominal batch size cap per upload.
    pub upload_batch_size: usize,
    /// Persist unsent buffers across restarts.
    pub save_events: bool,
    /// Hold all activity until an explicit enabling call (consent gating).
    pub defer_initialization: bool,
    /// Inactivity window after which a new session starts, in milliseconds.
    pub session_timeout_millis: i64,
    /// Start with opt-out active.
    pub opt_out: bool,
    /// Storage key for the persisted identity record.
    pub storage_key: String,
    /// Storage key for the unsent event buffer.
    pub unsent_key: String,
    /// Storage key for the unsent identify buffer.
    pub unsent_identify_key: String,
    /// Retention for persisted values, in days (0 = never expire).
    pub storage_expiration_days: u32,
    /// Base directory for the file store. None uses `~/.beacon`.
    pub storage_dir: Option<PathBuf>,
    /// Platform name attached to entries (subject to tracking options).
    pub platform: String,
    /// Language tag attached to entries (subject to tracking options).
    pub language: String,
    /// Application version attached to entries (subject to tracking options).
    pub version_name: Option<String>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Per-field attachment toggles.
    pub tracking_options: TrackingOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            force_https: true,
            batch_events: false,
            event_upload_threshold: DEFAULT_UPLOAD_THRESHOLD,
            event_upload_period_millis: DEFAULT_UPLOAD_PERIOD_MILLIS,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            save_events: true,
            defer_initialization: false,
            session_timeout_millis: DEFAULT_SESSION_TIMEOUT_MILLIS,
            opt_out: false,
            storage_key: "beacon_id".to_string(),
            unsent_key: "beacon_unsent".to_string(),
            unsent_identify_key: "beacon_unsent_identify".to_string(),
            storage_expiration_days: DEFAULT_STORAGE_EXPIRATION_DAYS,
            storage_dir: None,
            platform: std::env::consts::OS.to_string(),
            language: default_language(),
            version_name: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            tracking_options: TrackingOptions::default(),
        }
    }
}

fn default_language() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| lang.split('.').next().map(str::to_string))
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| "en".to_string())
}

impl Config {
    /// Replace invalid values with defaults, warning for each fallback.
    pub fn validated(mut self) -> Self {
        let defaults = Config::default();
        if self.api_endpoint.trim().is_empty() {
            warn!("Empty api_endpoint, falling back to default");
            self.api_endpoint = defaults.api_endpoint;
        } else if self.upload_url().is_err() {
            warn!(
                endpoint = %self.api_endpoint,
                "Unparseable api_endpoint, falling back to default"
            );
            self.api_endpoint = DEFAULT_API_ENDPOINT.to_string();
        }
        if self.event_upload_threshold == 0 {
            warn!(
                fallback = defaults.event_upload_threshold,
                "Invalid event_upload_threshold, falling back to default"
            );
            self.event_upload_threshold = defaults.event_upload_threshold;
        }
        if self.event_upload_period_millis == 0 {
            warn!(
                fallback = defaults.event_upload_period_millis,
                "Invalid event_upload_period_millis, falling back to default"
            );
            self.event_upload_period_millis = defaults.event_upload_period_millis;
        }
        if self.upload_batch_size == 0 {
            warn!(
                fallback = defaults.upload_batch_size,
                "Invalid upload_batch_size, falling back to default"
            );
            self.upload_batch_size = defaults.upload_batch_size;
        }
        if self.session_timeout_millis <= 0 {
            warn!(
                fallback = defaults.session_timeout_millis,
                "Invalid session_timeout_millis, falling back to default"
            );
            self.session_timeout_millis = defaults.session_timeout_millis;
        }
        if self.storage_key.trim().is_empty() {
            self.storage_key = defaults.storage_key;
        }
        if self.unsent_key.trim().is_empty() {
            self.unsent_key = defaults.unsent_key;
        }
        if self.unsent_identify_key.trim().is_empty() {
            self.unsent_identify_key = defaults.unsent_identify_key;
        }
        self
    }

    /// Full upload URL derived from the endpoint and the https flag.
    pub fn upload_url(&self) -> CoreResult<Url> {
        let scheme = if self.force_https { "https" } else { "http" };
        Ok(Url::parse(&format!(
            "{scheme}://{}/collect",
            self.api_endpoint
        ))?)
    }

    /// Base directory for the file store.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".beacon")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
        assert!(!config.batch_events);
        assert_eq!(config.event_upload_threshold, 30);
        assert_eq!(config.event_upload_period_millis, 30_000);
        assert_eq!(config.upload_batch_size, 100);
        assert!(config.save_events);
        assert!(config.force_https);
        assert_eq!(config.session_timeout_millis, 30 * 60 * 1000);
    }

    #[test]
    fn test_validated_replaces_invalid_values() {
        let config = Config {
            event_upload_threshold: 0,
            event_upload_period_millis: 0,
            upload_batch_size: 0,
            session_timeout_millis: -5,
            api_endpoint: "  ".to_string(),
            ..Default::default()
        }
        .validated();

        assert_eq!(config.event_upload_threshold, DEFAULT_UPLOAD_THRESHOLD);
        assert_eq!(
            config.event_upload_period_millis,
            DEFAULT_UPLOAD_PERIOD_MILLIS
        );
        assert_eq!(config.upload_batch_size, DEFAULT_UPLOAD_BATCH_SIZE);
        assert_eq!(config.session_timeout_millis, DEFAULT_SESSION_TIMEOUT_MILLIS);
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
    }

    #[test]
    fn test_validated_replaces_unparseable_endpoint() {
        let config = Config {
            api_endpoint: "bad endpoint".to_string(),
            ..Default::default()
        }
        .validated();

        // Config can never make client construction fail.
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
        assert!(config.upload_url().is_ok());
    }

    #[test]
    fn test_validated_keeps_valid_values() {
        let config = Config {
            batch_events: true,
            event_upload_threshold: 5,
            upload_batch_size: 10,
            ..Default::default()
        }
        .validated();

        assert!(config.batch_events);
        assert_eq!(config.event_upload_threshold, 5);
        assert_eq!(config.upload_batch_size, 10);
    }

    #[test]
    fn test_upload_url_https() {
        let config = Config::default();
        let url = config.upload_url().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.path(), "/collect");
    }

    #[test]
    fn test_upload_url_http_when_not_forced() {
        let config = Config {
            force_https: false,
            ..Default::default()
        };
        assert_eq!(config.upload_url().unwrap().scheme(), "http");
    }

    #[test]
    fn test_tracking_options_default_all_on() {
        let options = TrackingOptions::default();
        assert!(options.platform);
        assert!(options.language);
        assert!(options.version_name);
    }
}
