//! Transport implementations

pub mod channel;
pub mod websocket;

pub use channel::{ChannelServer, ChannelTransport, PeerHandle};
pub use websocket::{WebSocketConnection, WebSocketTransport};
