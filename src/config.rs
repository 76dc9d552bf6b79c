//! Client configuration
//!
//! Defaults match a command server on the local loopback: check liveness
//! every 3 seconds and reopen when no pong arrived for 10 seconds.
//!
//! A config file is a YAML document where every key is optional:
//!
//! ```yaml
//! endpoint: ws://127.0.0.1:8001
//! check_interval_ms: 3000
//! staleness_threshold_ms: 10000
//! close_timeout_ms: 250
//! event_buffer: 64
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::Endpoint;
use crate::{ClientError, Result};

/// Command server on the local loopback
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8001";
/// Staleness check period
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3);
/// Silence tolerated before the connection is reopened
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(10);
/// Bound on waiting for a WebSocket close handshake
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(250);
/// Frames queued between a link task and the supervisor
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Command server address
    pub endpoint: Endpoint,
    /// Period of the staleness check
    pub check_interval: Duration,
    /// Longest silence tolerated before reopening
    pub staleness_threshold: Duration,
    /// Upper bound on a best-effort close
    pub close_timeout: Duration,
    /// Inbound frames buffered between a connection and the dispatcher
    pub event_buffer: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    endpoint: Option<Endpoint>,
    check_interval_ms: Option<u64>,
    staleness_threshold_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    event_buffer: Option<usize>,
}

impl ClientConfig {
    /// Defaults for everything but the endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            check_interval: DEFAULT_CHECK_INTERVAL,
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Set the staleness check period
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the silence tolerated before reopening
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Set the bound on a best-effort close
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set how many inbound frames may queue for the dispatcher
    pub fn with_event_buffer(mut self, frames: usize) -> Self {
        self.event_buffer = frames;
        self
    }

    /// Check the settings are usable together.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(ClientError::config_error("check interval must be non-zero"));
        }
        if self.staleness_threshold.is_zero() {
            return Err(ClientError::config_error("staleness threshold must be non-zero"));
        }
        if self.staleness_threshold < self.check_interval {
            return Err(ClientError::config_error(format!(
                "staleness threshold {:?} is shorter than check interval {:?}",
                self.staleness_threshold, self.check_interval
            )));
        }
        if self.close_timeout.is_zero() {
            return Err(ClientError::config_error("close timeout must be non-zero"));
        }
        if self.event_buffer == 0 {
            return Err(ClientError::config_error("event buffer must hold at least one frame"));
        }
        Ok(())
    }

    /// Parse a YAML document, filling missing keys with defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawConfig = if yaml.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| ClientError::Parse {
                context: "client config".to_string(),
                details: e.to_string(),
            })?
        };

        let mut config = Self::default();
        if let Some(endpoint) = raw.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(ms) = raw.check_interval_ms {
            config.check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.staleness_threshold_ms {
            config.staleness_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.close_timeout_ms {
            config.close_timeout = Duration::from_millis(ms);
        }
        if let Some(frames) = raw.event_buffer {
            config.event_buffer = frames;
        }

        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ClientError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.check_interval, Duration::from_secs(3));
        assert_eq!(config.staleness_threshold, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_selected_keys() {
        let config = ClientConfig::from_yaml_str(
            "endpoint: ws://commands.example.com/ws\nstaleness_threshold_ms: 20000\n",
        )
        .unwrap();

        assert_eq!(config.endpoint.host(), "commands.example.com");
        assert_eq!(config.staleness_threshold, Duration::from_secs(20));
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);
    }

    #[test]
    fn tls_endpoint_is_a_parse_error() {
        let err = ClientConfig::from_yaml_str("endpoint: wss://commands.example.com/ws").unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }), "got {err:?}");
        assert!(err.to_string().contains("TLS"));
    }

    #[test]
    fn empty_document_means_defaults() {
        assert_eq!(ClientConfig::from_yaml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ClientConfig::from_yaml_str("endpoint: ws://a:1\nping_interval_ms: 5\n").unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = ClientConfig::from_yaml_str("endpoint: http://a:1\n").unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }));
        assert!(err.to_string().contains("client config"));
    }

    #[test]
    fn threshold_shorter_than_interval_is_rejected() {
        let config = ClientConfig::default()
            .with_check_interval(Duration::from_secs(5))
            .with_staleness_threshold(Duration::from_secs(2));
        assert!(matches!(config.validate(), Err(ClientError::Config { .. })));
    }

    #[test]
    fn zero_values_are_rejected() {
        let base = ClientConfig::default();
        assert!(base.clone().with_check_interval(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_close_timeout(Duration::ZERO).validate().is_err());
        assert!(base.with_event_buffer(0).validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClientConfig::from_file("/nonexistent/wsexec.yaml").unwrap_err();
        match err {
            ClientError::File { path, .. } => assert!(path.ends_with("wsexec.yaml")),
            other => panic!("expected file error, got {other:?}"),
        }
    }
}
