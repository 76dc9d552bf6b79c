//! Self-healing WebSocket command client.
//!
//! wsexec keeps a single connection to a command server alive without
//! outside help. The server pushes JSON events; `data` events carry opaque
//! commands that are handed to an [`Executor`], and `pong` events prove the
//! server is still there. When no pong arrives within the staleness threshold,
//! or the transport fails, the connection is torn down and reopened.
//!
//! # Features
//!
//! - **Staleness detection**: catches connections that look open but went silent
//! - **Single connection**: the old connection is closed before a new one opens
//! - **Pluggable executor**: commands go to any `Fn(&str)` or [`Executor`] impl
//! - **Pluggable transport**: WebSocket by default, in-process channels for embedding
//! - **Companion server**: [`CommandServer`] pushes named commands to connected clients
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsexec::{Client, ClientConfig, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> wsexec::Result<()> {
//!     let config = ClientConfig::new(Endpoint::parse("ws://127.0.0.1:8001")?);
//!     let client = Client::connect(config, Arc::new(|payload: &str| {
//!         println!("{payload}");
//!     }))?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     client.shutdown().await
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod types;

// Connection lifecycle
pub mod client;
pub mod dispatch;
pub mod executor;
pub mod heartbeat;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod transports;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use client::Client;
pub use config::ClientConfig;
pub use dispatch::Dispatcher;
pub use executor::{Executor, LineWriterExecutor, LoggingExecutor};
pub use heartbeat::HeartbeatTracker;
pub use server::{CommandServer, ServerConfig};
pub use transport::{Connection, Transport};
pub use transports::{ChannelServer, ChannelTransport, PeerHandle, WebSocketTransport};
