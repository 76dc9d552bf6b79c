//! Inbound wire messages
//!
//! The server sends JSON objects tagged by an `event` field:
//!
//! ```text
//! {"event": "welcome", "version": {"main": 0, "patch": 1}}
//! {"event": "data", "data": "<payload>"}
//! {"event": "pong"}
//! ```
//!
//! Any other `event` value decodes to [`InboundMessage::Unknown`]. A frame
//! that is not a JSON object, lacks a string `event`, or carries a known
//! event with missing fields is a decode error.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::{ClientError, Result};

/// Server protocol version announced in the welcome event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServerVersion {
    /// Major version
    pub main: u32,
    /// Patch level
    pub patch: u32,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.main, self.patch)
    }
}

/// Discriminant of an [`InboundMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Welcome,
    Data,
    Pong,
    Unknown,
}

/// One decoded inbound frame. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Welcome { version: ServerVersion },
    Data { payload: String },
    Pong,
    Unknown { event: String, raw: Value },
}

#[derive(Deserialize)]
struct WelcomeBody {
    version: ServerVersion,
}

#[derive(Deserialize)]
struct DataBody {
    data: String,
}

impl InboundMessage {
    /// Decode a raw frame.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ClientError::malformed_json("frame is not valid JSON", e))?;

        let event = match value.get("event") {
            Some(Value::String(event)) => event.clone(),
            Some(other) => {
                return Err(ClientError::malformed(format!("event field is not a string: {other}")));
            }
            None if value.is_object() => {
                return Err(ClientError::malformed("missing event field"));
            }
            None => return Err(ClientError::malformed("frame is not a JSON object")),
        };

        match event.as_str() {
            "welcome" => {
                let body: WelcomeBody = serde_json::from_value(value)
                    .map_err(|e| ClientError::malformed_json("invalid welcome event", e))?;
                Ok(InboundMessage::Welcome { version: body.version })
            }
            "data" => {
                let body: DataBody = serde_json::from_value(value)
                    .map_err(|e| ClientError::malformed_json("invalid data event", e))?;
                Ok(InboundMessage::Data { payload: body.data })
            }
            "pong" => Ok(InboundMessage::Pong),
            _ => Ok(InboundMessage::Unknown { event, raw: value }),
        }
    }

    /// Which handler this message is routed to
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Welcome { .. } => MessageKind::Welcome,
            InboundMessage::Data { .. } => MessageKind::Data,
            InboundMessage::Pong => MessageKind::Pong,
            InboundMessage::Unknown { .. } => MessageKind::Unknown,
        }
    }
}
