//! Command server address

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tokio_tungstenite::tungstenite::http::Uri;

use crate::{ClientError, Result};

const DEFAULT_WS_PORT: u16 = 80;

/// Immutable address of the command server.
///
/// Parsed once at startup from a `ws://` URI. The original URI string is kept
/// verbatim so the transport connects to exactly what was configured
/// (including any path or query).
///
/// `wss://` is rejected: the transport is built without TLS support, so such
/// an endpoint could never connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Endpoint {
    uri: String,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse and validate an endpoint URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let parsed: Uri = trimmed
            .parse()
            .map_err(|e| ClientError::invalid_endpoint(trimmed, format!("{e}")))?;

        match parsed.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("ws") => {}
            Some(s) if s.eq_ignore_ascii_case("wss") => {
                return Err(ClientError::invalid_endpoint(
                    trimmed,
                    "wss requires TLS, which this client is built without; use ws://",
                ));
            }
            Some(other) => {
                return Err(ClientError::invalid_endpoint(
                    trimmed,
                    format!("unsupported scheme '{other}', expected ws"),
                ));
            }
            None => return Err(ClientError::invalid_endpoint(trimmed, "missing scheme")),
        }

        let host = match parsed.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ClientError::invalid_endpoint(trimmed, "missing host")),
        };

        let port = parsed.port_u16().unwrap_or(DEFAULT_WS_PORT);

        Ok(Self { uri: trimmed.to_string(), host, port })
    }

    /// The URI exactly as configured
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Host name or address, without port
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, or 80 when the URI names none
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// `ws://127.0.0.1:8001`
impl Default for Endpoint {
    fn default() -> Self {
        Self {
            uri: crate::config::DEFAULT_ENDPOINT.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self> {
        Endpoint::parse(&value)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loopback_endpoint() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:8001").unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 8001);
        assert_eq!(endpoint.as_str(), "ws://127.0.0.1:8001");
    }

    #[test]
    fn default_matches_parsed_default_uri() {
        let parsed = Endpoint::parse(crate::config::DEFAULT_ENDPOINT).unwrap();
        assert_eq!(Endpoint::default(), parsed);
    }

    #[test]
    fn port_defaults_to_80() {
        assert_eq!(Endpoint::parse("ws://localhost").unwrap().port(), 80);
        assert_eq!(Endpoint::parse("WS://localhost/commands").unwrap().port(), 80);
    }

    #[test]
    fn keeps_path_in_uri() {
        let endpoint: Endpoint = "ws://example.com:9443/ws?client=1".parse().unwrap();
        assert_eq!(endpoint.to_string(), "ws://example.com:9443/ws?client=1");
        assert_eq!(endpoint.port(), 9443);
    }

    #[test]
    fn rejects_tls_endpoints_up_front() {
        let err = Endpoint::parse("wss://example.com/commands").unwrap_err();
        match &err {
            ClientError::InvalidEndpoint { reason, .. } => assert!(reason.contains("TLS")),
            other => panic!("expected invalid endpoint, got {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn rejects_non_websocket_schemes() {
        let err = Endpoint::parse("http://127.0.0.1:8001").unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint { .. }));
        assert!(err.to_string().contains("http://127.0.0.1:8001"));
    }

    #[test]
    fn rejects_missing_scheme_and_garbage() {
        assert!(Endpoint::parse("127.0.0.1:8001").is_err());
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("ws://").is_err());
    }

    #[test]
    fn deserializes_from_string() {
        let endpoint: Endpoint = serde_json::from_str("\"ws://10.0.0.2:9000\"").unwrap();
        assert_eq!(endpoint.host(), "10.0.0.2");
        assert!(serde_json::from_str::<Endpoint>("\"ftp://x\"").is_err());
    }
}
