//! Connection lifecycle states

use std::fmt;

/// Lifecycle state of the supervised connection.
///
/// ```text
/// DISCONNECTED --open--> CONNECTING --transport open--> CONNECTED
///      ^                     ^                              |
///      |                     |                        stale | lost | requested
///      +-- transport lost ---+------- RECONNECTING <--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transient: closing the old connection before opening a new one
    Reconnecting,
}

impl ConnectionState {
    /// Whether a connection is open and receiving
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Upper-case state name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the supervisor replaced the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// No pong within the staleness threshold
    Stale,
    /// The transport failed, was refused, or the peer hung up
    TransportLost,
    /// Explicit request through the client handle
    Requested,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconnectReason::Stale => "stale",
            ReconnectReason::TransportLost => "transport lost",
            ReconnectReason::Requested => "requested",
        })
    }
}
