//! Core types shared by the supervisor, dispatcher and transports.
//!
//! - [`Endpoint`] is the immutable server address
//! - [`InboundMessage`] is one decoded frame
//! - [`ConnectionState`] is the supervisor's lifecycle state

mod endpoint;
mod message;
mod state;

pub use endpoint::Endpoint;
pub use message::{InboundMessage, MessageKind, ServerVersion};
pub use state::{ConnectionState, ReconnectReason};
