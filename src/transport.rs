//! Transport trait for the lower-level message channel

use crate::Result;
use crate::types::Endpoint;

/// Opens message-oriented connections to an [`Endpoint`].
///
/// Shared between connection generations; each call to [`connect`](Self::connect)
/// yields a fresh, independent [`Connection`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new connection.
    ///
    /// Returns once the channel is open and ready to deliver frames.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>>;
}

/// One open channel to the endpoint.
#[async_trait::async_trait]
pub trait Connection: Send + 'static {
    /// Wait for the next inbound frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - Frame received
    /// - `Ok(None)` - Peer closed the connection
    /// - `Err(e)` - Transport failure
    ///
    /// Must be cancel-safe: the supervisor drops this future when it closes
    /// the connection.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;

    /// Close the connection without waiting for the peer.
    ///
    /// Best-effort; callers swallow the error since the connection is being
    /// discarded anyway.
    async fn close(&mut self) -> Result<()>;
}
