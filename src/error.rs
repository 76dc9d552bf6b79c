//! Error types for the command client.
//!
//! All errors implement `std::error::Error` and carry enough context to log a
//! useful line. Most of them never reach the caller: the supervisor recovers
//! from transport failures and staleness by reopening the connection, and the
//! dispatcher drops malformed frames.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: inbound frame is not a well-formed event record
//! - **Transport Errors**: connect refused, reset, or dropped
//! - **Liveness**: no pong within the staleness threshold
//! - **Configuration Errors**: invalid endpoint, config document or file
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use wsexec::ClientError;
//!
//! let error = ClientError::transport_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Main error type for client operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    #[error("Malformed message: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No pong for {elapsed:?} (threshold {threshold:?})")]
    Stale { elapsed: Duration, threshold: Duration },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid endpoint '{uri}': {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Config file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Client supervisor has shut down")]
    Shutdown,
}

impl ClientError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Stale { .. } => true,
            ClientError::Timeout { .. } => true,
            ClientError::Decode { .. } => false,
            ClientError::InvalidEndpoint { .. } => false,
            ClientError::Config { .. } => false,
            ClientError::Parse { .. } => false,
            ClientError::File { .. } => false,
            ClientError::Shutdown => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ClientError::Decode { .. } => vec![
                "Check the server sends JSON objects with an \"event\" field",
                "Verify the server protocol version",
            ],
            ClientError::Transport { .. } => vec![
                "Ensure the command server is running",
                "Check the endpoint host and port",
                "Wait for the next automatic reconnect",
            ],
            ClientError::Stale { .. } => vec![
                "Check the server is sending pong events",
                "Increase the staleness threshold",
            ],
            ClientError::Timeout { .. } => vec![
                "Increase the close timeout",
                "Check network latency to the endpoint",
            ],
            ClientError::InvalidEndpoint { .. } => vec![
                "Use a ws:// URI; wss:// is not supported",
                "Include a host name or address",
            ],
            ClientError::Config { .. } => vec![
                "Use non-zero intervals",
                "Keep the staleness threshold at or above the check interval",
            ],
            ClientError::Parse { .. } => vec![
                "Check the YAML syntax of the config file",
                "Remove unknown keys from the config file",
            ],
            ClientError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            ClientError::Shutdown => vec!["Create a new client"],
        }
    }

    /// Helper constructor for decode errors without a JSON source.
    pub fn malformed(reason: impl Into<String>) -> Self {
        ClientError::Decode { reason: reason.into(), source: None }
    }

    /// Helper constructor for decode errors raised by the JSON parser.
    pub fn malformed_json(reason: impl Into<String>, source: serde_json::Error) -> Self {
        ClientError::Decode { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        ClientError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        ClientError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for endpoint errors.
    pub fn invalid_endpoint(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        ClientError::InvalidEndpoint { uri: uri.into(), reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        ClientError::Config { reason: reason.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        ClientError::File { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            uri in "[a-z]{1,8}://[a-z0-9.]{1,16}",
            elapsed_ms in 1u64..600_000u64,
            threshold_ms in 1u64..600_000u64,
          ) {
            let transport = ClientError::transport_failed(reason.clone());
            prop_assert!(transport.to_string().contains(&reason));

            let decode = ClientError::malformed(reason.clone());
            prop_assert!(decode.to_string().contains(&reason));

            let endpoint = ClientError::invalid_endpoint(uri.clone(), reason.clone());
            prop_assert!(endpoint.to_string().contains(&uri));

            let stale = ClientError::Stale {
              elapsed: Duration::from_millis(elapsed_ms),
              threshold: Duration::from_millis(threshold_ms),
            };
            prop_assert!(!stale.to_string().is_empty());
            prop_assert!(stale.is_retryable());
          }

          #[test]
          fn transport_source_chain_is_preserved(base_message in ".*") {
            let source: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));
            let error = ClientError::transport_failed_with_source("connect", source);

            let inner = std::error::Error::source(&error);
            prop_assert!(inner.is_some());
            prop_assert_eq!(inner.map(|e| e.to_string()), Some(base_message));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ClientError>();

        let error = ClientError::transport_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(ClientError::transport_failed("reset").is_retryable());
        assert!(ClientError::Timeout { duration: Duration::from_millis(250) }.is_retryable());
        assert!(!ClientError::malformed("not json").is_retryable());
        assert!(!ClientError::config_error("zero interval").is_retryable());
        assert!(!ClientError::Shutdown.is_retryable());
    }

    #[test]
    fn every_error_has_suggestions() {
        let errors = [
            ClientError::malformed("x"),
            ClientError::transport_failed("x"),
            ClientError::Stale { elapsed: Duration::from_secs(11), threshold: Duration::from_secs(10) },
            ClientError::Timeout { duration: Duration::from_secs(1) },
            ClientError::invalid_endpoint("x", "y"),
            ClientError::config_error("x"),
            ClientError::Parse { context: "config".into(), details: "x".into() },
            ClientError::file_error(
                PathBuf::from("/missing.yaml"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            ),
            ClientError::Shutdown,
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "no suggestions for {error}");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn decode_error_exposes_json_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = ClientError::malformed_json("frame is not JSON", json_err);
        assert!(std::error::Error::source(&error).is_some());
    }
}
