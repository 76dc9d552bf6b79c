//! Companion command server
//!
//! Speaks the events the client understands: a `welcome` when a connection
//! opens, a `pong` on a fixed interval, and a `data` event for each broadcast
//! command. Only the newest command is pushed; a connection that opens after a
//! broadcast does not receive it.
//!
//! Commands are named actions whose payloads are loaded from files at startup:
//!
//! ```yaml
//! listen: 127.0.0.1:8001
//! pong_interval_ms: 1000
//! actions:
//!   reload: commands/reload.js
//!   mute: commands/mute.js
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::ServerVersion;
use crate::{ClientError, Result};

/// Address the server listens on by default
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8001";
/// Pong cadence; well inside the client's default staleness threshold
pub const DEFAULT_PONG_INTERVAL: Duration = Duration::from_secs(1);
/// Version announced in the welcome event
pub const SERVER_VERSION: ServerVersion = ServerVersion { main: 0, patch: 1 };

/// Settings for a [`CommandServer`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address; port 0 picks a free port
    pub listen: SocketAddr,
    /// Period between pong events on each connection
    pub pong_interval: Duration,
    /// Action name to payload file
    pub actions: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    listen: Option<SocketAddr>,
    pong_interval_ms: Option<u64>,
    actions: Option<BTreeMap<String, PathBuf>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8001)),
            pong_interval: DEFAULT_PONG_INTERVAL,
            actions: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.pong_interval.is_zero() {
            return Err(ClientError::config_error("pong interval must be non-zero"));
        }
        if let Some(name) = self.actions.keys().find(|name| name.trim().is_empty()) {
            return Err(ClientError::config_error(format!("invalid action name '{name}'")));
        }
        Ok(())
    }

    /// Parse a YAML document, filling missing keys with defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawServerConfig = if yaml.trim().is_empty() {
            RawServerConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| ClientError::Parse {
                context: "server config".to_string(),
                details: e.to_string(),
            })?
        };

        let mut config = Self::default();
        if let Some(listen) = raw.listen {
            config.listen = listen;
        }
        if let Some(ms) = raw.pong_interval_ms {
            config.pong_interval = Duration::from_millis(ms);
        }
        if let Some(actions) = raw.actions {
            config.actions = actions;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ClientError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Read every action's payload file. Fails on the first unreadable file.
    pub fn load_actions(&self) -> Result<BTreeMap<String, String>> {
        self.actions
            .iter()
            .map(|(name, path)| {
                let payload = std::fs::read_to_string(path)
                    .map_err(|e| ClientError::file_error(path.clone(), e))?;
                debug!(action = %name, path = %path.display(), bytes = payload.len(), "Loaded action");
                Ok((name.clone(), payload))
            })
            .collect()
    }
}

/// `welcome` event announcing `version`
pub fn welcome_event(version: ServerVersion) -> String {
    json!({"event": "welcome", "version": {"main": version.main, "patch": version.patch}})
        .to_string()
}

/// `data` event carrying `payload`
pub fn data_event(payload: &str) -> String {
    json!({"event": "data", "data": payload}).to_string()
}

/// `pong` keepalive event
pub fn pong_event() -> String {
    json!({"event": "pong"}).to_string()
}

/// Newest broadcast command; `serial` 0 means nothing was broadcast yet.
#[derive(Debug, Clone, Default)]
struct Broadcast {
    serial: u64,
    payload: String,
}

#[derive(Debug, Default)]
struct ServerCounters {
    accepted: AtomicUsize,
    live: AtomicUsize,
}

/// Running command server.
///
/// Dropping the handle stops accepting and closes every connection.
pub struct CommandServer {
    local_addr: SocketAddr,
    commands: Arc<watch::Sender<Broadcast>>,
    counters: Arc<ServerCounters>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CommandServer {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen).await.map_err(|e| {
            ClientError::transport_failed_with_source(
                format!("failed to listen on {}", config.listen),
                Box::new(e),
            )
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            ClientError::transport_failed_with_source("listener has no local address", Box::new(e))
        })?;

        let (commands, _) = watch::channel(Broadcast::default());
        let commands = Arc::new(commands);
        let counters = Arc::new(ServerCounters::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&commands),
            Arc::clone(&counters),
            config.pong_interval,
            cancel.clone(),
        ));

        info!(%local_addr, pong_interval = ?config.pong_interval, "Command server listening");

        Ok(Self { local_addr, commands, counters, cancel, task: Some(task) })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URI clients can connect to
    pub fn endpoint_uri(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Push `payload` to every open connection. Returns the command's serial.
    pub fn broadcast(&self, payload: impl Into<String>) -> u64 {
        let payload = payload.into();
        let mut serial = 0;
        self.commands.send_modify(|current| {
            current.serial = current.serial.wrapping_add(1).max(1);
            current.payload = payload;
            serial = current.serial;
        });
        debug!(serial, receivers = self.commands.receiver_count(), "Broadcasting command");
        serial
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Stop accepting, close every connection and wait for them to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Command server task failed: {}", e);
                return Err(ClientError::Shutdown);
            }
        }
        Ok(())
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for CommandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServer")
            .field("local_addr", &self.local_addr)
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: Arc<watch::Sender<Broadcast>>,
    counters: Arc<ServerCounters>,
    pong_interval: Duration,
    cancel: CancellationToken,
) {
    let mut peers = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = peers.join_next(), if !peers.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let id = counters.accepted.fetch_add(1, Ordering::SeqCst) + 1;
                    // Subscribing here marks the current command as seen
                    let commands = commands.subscribe();
                    peers.spawn(serve_peer(
                        id,
                        addr,
                        stream,
                        commands,
                        Arc::clone(&counters),
                        pong_interval,
                        cancel.child_token(),
                    ));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }

    while peers.join_next().await.is_some() {}
    debug!("Command server stopped");
}

struct LiveConnection(Arc<ServerCounters>);

impl LiveConnection {
    fn open(counters: Arc<ServerCounters>) -> Self {
        counters.live.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_peer(
    id: usize,
    addr: SocketAddr,
    stream: TcpStream,
    commands: watch::Receiver<Broadcast>,
    counters: Arc<ServerCounters>,
    pong_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(id, %addr, "WebSocket handshake failed: {}", e);
            return;
        }
    };

    let _live = LiveConnection::open(counters);
    info!(id, %addr, "Client connected");

    match push_events(&mut ws, commands, pong_interval, &cancel).await {
        Ok(()) => info!(id, %addr, "Client disconnected"),
        Err(e) => warn!(id, %addr, "Connection failed: {}", e),
    }

    if let Err(e) = ws.close(None).await {
        debug!(id, "Ignoring close error: {}", e);
    }
}

async fn push_events(
    ws: &mut WebSocketStream<TcpStream>,
    mut commands: watch::Receiver<Broadcast>,
    pong_interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    send(ws, welcome_event(SERVER_VERSION)).await?;

    let mut ticker = tokio::time::interval_at(Instant::now() + pong_interval, pong_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => send(ws, pong_event()).await?,
            changed = commands.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let command = commands.borrow_and_update().clone();
                debug!(serial = command.serial, "Sending command");
                send(ws, data_event(&command.payload)).await?;
            }
            incoming = ws.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(e)) => {
                    return Err(ClientError::transport_failed_with_source(
                        "WebSocket receive failed",
                        Box::new(e),
                    ));
                }
                // Nothing inbound is defined; control frames are handled by tungstenite
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, event: String) -> Result<()> {
    ws.send(Message::text(event)).await.map_err(|e| {
        ClientError::transport_failed_with_source("WebSocket send failed", Box::new(e))
    })
}
