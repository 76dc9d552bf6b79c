//! Client handle for a supervised command connection

use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::executor::Executor;
use crate::heartbeat::HeartbeatTracker;
use crate::supervisor::{Command, Supervisor};
use crate::transport::Transport;
use crate::transports::WebSocketTransport;
use crate::types::{ConnectionState, Endpoint};
use crate::{ClientError, Result};


/// Handle to a self-healing connection to one command server.
///
/// The connection is owned by a background supervisor task that keeps it
/// alive: it reopens the connection when no pong arrives within the
/// staleness threshold or when the transport fails, forever, at the check
/// interval. Received `data` commands go to the [`Executor`].
///
/// Dropping the handle stops the supervisor.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wsexec::{Client, ClientConfig, LoggingExecutor};
///
/// #[tokio::main]
/// async fn main() -> wsexec::Result<()> {
///     let config = ClientConfig::from_yaml_str("endpoint: ws://127.0.0.1:8001")?;
///     let client = Client::connect(config, Arc::new(LoggingExecutor))?;
///     tokio::signal::ctrl_c().await.ok();
///     client.shutdown().await
/// }
/// ```
pub struct Client {
    endpoint: Endpoint,
    state: watch::Receiver<ConnectionState>,
    heartbeat: Arc<HeartbeatTracker>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Client {
    /// Start a client over WebSocket.
    ///
    /// Returns immediately; the first connection is opened in the background.
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ClientConfig, executor: Arc<dyn Executor>) -> Result<Self> {
        let transport = Arc::new(WebSocketTransport::new(config.close_timeout));
        Self::with_transport(config, transport, executor)
    }

    /// Start a client over a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        config.validate()?;
        info!(endpoint = %config.endpoint, "Starting command client");

        let endpoint = config.endpoint.clone();
        let channels = Supervisor::spawn(config, transport, executor);

        Ok(Self {
            endpoint,
            state: channels.state,
            heartbeat: channels.heartbeat,
            commands: channels.commands,
            cancel: channels.cancel,
            task: Some(channels.task),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Lifecycle state changes as a stream.
    ///
    /// Yields the current state first, then every subsequent change. Ends
    /// when the supervisor stops.
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Wait until the supervisor reports `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut state = self.state.clone();
        state.wait_for(|current| *current == target).await.map_err(|_| ClientError::Shutdown)?;
        Ok(())
    }

    /// Liveness tracker fed by inbound pongs
    pub fn heartbeat(&self) -> &HeartbeatTracker {
        &self.heartbeat
    }

    /// Seconds since the last pong, or since the client started if none arrived
    pub fn seconds_since_last_pong(&self) -> f64 {
        self.heartbeat.seconds_since_last_pong()
    }

    /// Server address this client keeps connected to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Ask the supervisor to close the current connection and open a new one.
    pub fn reconnect(&self) -> Result<()> {
        self.commands.send(Command::Reconnect).map_err(|_| ClientError::Shutdown)
    }

    /// Stop the supervisor and wait for the connection to close.
    pub async fn shutdown(mut self) -> Result<()> {
        debug!(endpoint = %self.endpoint, "Shutting down command client");
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(endpoint = %self.endpoint, "Supervisor task failed: {}", e);
                return Err(ClientError::Shutdown);
            }
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Cancel tasks on drop for clean shutdown
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
