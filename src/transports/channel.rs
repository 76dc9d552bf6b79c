//! In-process transport backed by tokio channels.
//!
//! Each successful [`connect`](Transport::connect) hands a [`PeerHandle`] to the
//! paired [`ChannelServer`], which plays the command server: it pushes frames,
//! injects transport failures, or hangs up. The shared counters record connect
//! attempts, opens, and how many connections are live at once, which makes the
//! transport suitable for embedding a client in-process and for exercising the
//! supervisor without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{Connection, Transport};
use crate::types::Endpoint;
use crate::{ClientError, Result};

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    refusing: AtomicBool,
}

enum PeerEvent {
    Frame(Vec<u8>),
    Fail(String),
}

/// Client side of an in-process channel pair
#[derive(Clone)]
pub struct ChannelTransport {
    counters: Arc<Counters>,
    accepted: mpsc::UnboundedSender<PeerHandle>,
}

/// Server side of an in-process channel pair
pub struct ChannelServer {
    counters: Arc<Counters>,
    accepted: mpsc::UnboundedReceiver<PeerHandle>,
}

impl ChannelTransport {
    /// Create a connected transport/server pair.
    pub fn pair() -> (ChannelTransport, ChannelServer) {
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelTransport { counters: Arc::clone(&counters), accepted: tx },
            ChannelServer { counters, accepted: rx },
        )
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);

        if self.counters.refusing.load(Ordering::SeqCst) {
            return Err(ClientError::transport_failed(format!("connection refused by {endpoint}")));
        }

        let id = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ChannelConnection {
            id,
            frames: rx,
            live: Some(LiveGuard::acquire(Arc::clone(&self.counters))),
        };

        self.accepted
            .send(PeerHandle { id, frames: tx })
            .map_err(|_| ClientError::transport_failed(format!("{endpoint} is not accepting")))?;

        debug!(id, "Channel connection opened");
        Ok(Box::new(connection))
    }
}

impl ChannelServer {
    /// Wait for the next opened connection.
    ///
    /// Returns `None` once every [`ChannelTransport`] clone is dropped.
    pub async fn accept(&mut self) -> Option<PeerHandle> {
        self.accepted.recv().await
    }

    /// Refuse (`true`) or accept (`false`) subsequent connect attempts
    pub fn set_refusing(&self, refusing: bool) {
        self.counters.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Connect calls so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    /// Connections successfully opened so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed
    pub fn peak_live(&self) -> usize {
        self.counters.peak_live.load(Ordering::SeqCst)
    }
}

/// Server's end of one channel connection
#[derive(Debug)]
pub struct PeerHandle {
    id: usize,
    frames: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerHandle {
    /// Sequence number of this connection, starting at 1
    pub fn id(&self) -> usize {
        self.id
    }

    /// Send a raw frame. Returns `false` if the client closed this connection.
    pub fn send_bytes(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.frames.send(PeerEvent::Frame(frame.into())).is_ok()
    }

    /// Send a UTF-8 frame
    pub fn send_text(&self, frame: &str) -> bool {
        self.send_bytes(frame.as_bytes())
    }

    /// Make the client's next read fail with a transport error
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.frames.send(PeerEvent::Fail(reason.into())).is_ok()
    }

    /// Whether the client side has closed or dropped this connection
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// Wait until the client side closes this connection
    pub async fn closed(&self) {
        self.frames.closed().await
    }

    /// Close from the server side; the client reads end-of-stream.
    pub fn hang_up(self) {
        drop(self)
    }
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Frame(frame) => write!(f, "Frame({} bytes)", frame.len()),
            PeerEvent::Fail(reason) => write!(f, "Fail({reason})"),
        }
    }
}

struct LiveGuard {
    counters: Arc<Counters>,
}

impl LiveGuard {
    fn acquire(counters: Arc<Counters>) -> Self {
        let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_live.fetch_max(live, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ChannelConnection {
    id: usize,
    frames: mpsc::UnboundedReceiver<PeerEvent>,
    live: Option<LiveGuard>,
}

#[async_trait::async_trait]
impl Connection for ChannelConnection {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.frames.recv().await {
            Some(PeerEvent::Frame(frame)) => Ok(Some(frame)),
            Some(PeerEvent::Fail(reason)) => Err(ClientError::transport_failed(reason)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.frames.close();
        if self.live.take().is_some() {
            debug!(id = self.id, "Channel connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::parse("ws://127.0.0.1:8001").unwrap()
    }

    #[tokio::test]
    async fn frames_flow_from_peer_to_connection() {
        let (transport, mut server) = ChannelTransport::pair();
        let mut connection = transport.connect(&endpoint()).await.unwrap();
        let peer = server.accept().await.unwrap();

        assert_eq!(peer.id(), 1);
        assert!(peer.send_text(r#"{"event":"pong"}"#));
        assert_eq!(connection.next_frame().await.unwrap(), Some(br#"{"event":"pong"}"#.to_vec()));

        assert!(peer.fail("reset by peer"));
        assert!(connection.next_frame().await.is_err());

        peer.hang_up();
        assert_eq!(connection.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_visible_to_peer_and_counters() {
        let (transport, mut server) = ChannelTransport::pair();
        let mut connection = transport.connect(&endpoint()).await.unwrap();
        let peer = server.accept().await.unwrap();
        assert_eq!(server.live(), 1);

        connection.close().await.unwrap();
        peer.closed().await;
        assert!(peer.is_closed());
        assert!(!peer.send_text("late"));
        assert_eq!(server.live(), 0);

        // Second close is a no-op
        connection.close().await.unwrap();
        drop(connection);
        assert_eq!(server.live(), 0);
    }

    #[tokio::test]
    async fn dropping_connection_releases_live_slot() {
        let (transport, mut server) = ChannelTransport::pair();
        let first = transport.connect(&endpoint()).await.unwrap();
        let second = transport.connect(&endpoint()).await.unwrap();
        let _peers = (server.accept().await.unwrap(), server.accept().await.unwrap());

        assert_eq!(server.live(), 2);
        assert_eq!(server.peak_live(), 2);
        drop(first);
        drop(second);
        assert_eq!(server.live(), 0);
        assert_eq!(server.opened(), 2);
    }

    #[tokio::test]
    async fn refusal_counts_attempts_but_not_opens() {
        let (transport, server) = ChannelTransport::pair();
        server.set_refusing(true);

        let err = transport.connect(&endpoint()).await.err().unwrap();
        assert!(err.is_retryable());
        assert_eq!(server.attempts(), 1);
        assert_eq!(server.opened(), 0);
        assert_eq!(server.live(), 0);
    }
}
