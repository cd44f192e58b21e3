//! Endpoint configuration
//!
//! Accepted as camelCase JSON so the browser layer can pass a config string
//! straight from JavaScript. Missing fields take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a request waits for its reply
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 30_000;

/// Default time `connect` waits for the remote `ready` signal
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 90_000;

/// Default bound on queued inbound events
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default limit on outstanding requests per endpoint
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1000;

/// Default period between sweeps of expired registrations
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 250;

/// Who drains the inbound queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// A dedicated consumer thread (native, threaded wasm)
    Thread,
    /// The port's event listener drains the queue itself (browser main thread)
    Inline,
}

impl Default for DispatchMode {
    #[cfg(not(target_arch = "wasm32"))]
    fn default() -> Self {
        DispatchMode::Thread
    }

    #[cfg(target_arch = "wasm32")]
    fn default() -> Self {
        DispatchMode::Inline
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    /// Used in log lines and as the dispatcher thread name
    pub name: String,
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub queue_capacity: usize,
    pub max_pending_requests: usize,
    /// Log every envelope sent and received at `info`
    pub message_logging: bool,
    pub dispatch: DispatchMode,
    /// How often the `Thread` dispatcher wakes to check for termination and
    /// sweep overdue requests. Deadlines themselves do not wait for it.
    pub reap_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "endpoint".to_string(),
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            message_logging: false,
            dispatch: DispatchMode::default(),
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON config object
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_pending_requests(mut self, limit: usize) -> Self {
        self.max_pending_requests = limit;
        self
    }

    pub fn with_message_logging(mut self, enabled: bool) -> Self {
        self.message_logging = enabled;
        self
    }

    pub fn with_dispatch(mut self, mode: DispatchMode) -> Self {
        self.dispatch = mode;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = duration_ms(interval);
        self
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Sweep period, never below 1ms
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(90));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.max_pending_requests, 1000);
        assert!(!config.message_logging);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EndpointConfig::from_json(r#"{"name":"storage","responseTimeoutMs":500,"dispatch":"inline"}"#)
                .unwrap();
        assert_eq!(config.name, "storage");
        assert_eq!(config.response_timeout(), Duration::from_millis(500));
        assert_eq!(config.dispatch, DispatchMode::Inline);
        // Everything else falls back to defaults
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_from_json_rejects_unknown_mode() {
        assert!(EndpointConfig::from_json(r#"{"dispatch":"fiber"}"#).is_err());
    }

    #[test]
    fn test_builder() {
        let config = EndpointConfig::new("w")
            .with_response_timeout(Duration::from_millis(250))
            .with_max_pending_requests(4)
            .with_reap_interval(Duration::ZERO);
        assert_eq!(config.response_timeout_ms, 250);
        assert_eq!(config.max_pending_requests, 4);
        assert_eq!(config.reap_interval(), Duration::from_millis(1));
    }
}
