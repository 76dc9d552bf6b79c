//! Supervisor owns the connection lifecycle
//!
//! One supervisor task owns the current connection and is the only place that
//! opens or closes it, so reconnects are serialized without a separate lock.
//! Each connection generation runs in its own link task that connects, reads
//! frames, and forwards them to the supervisor tagged with its generation
//! number. Replacing a connection cancels the old link task and waits for it to
//! exit (closing its connection) before the next generation is spawned.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ClientError;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::executor::Executor;
use crate::heartbeat::HeartbeatTracker;
use crate::transport::{Connection, Transport};
use crate::types::{ConnectionState, Endpoint, ReconnectReason};

/// Requests from the client handle
#[derive(Debug)]
pub enum Command {
    /// Close the current connection and open a new one
    Reconnect,
}

/// Handles returned by [`Supervisor::spawn`]
pub struct SupervisorChannels {
    /// Lifecycle state updates
    pub state: watch::Receiver<ConnectionState>,
    /// Liveness shared with the dispatcher
    pub heartbeat: Arc<HeartbeatTracker>,
    /// Command sender
    pub commands: mpsc::UnboundedSender<Command>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// Supervisor task
    pub task: JoinHandle<()>,
}

#[derive(Debug)]
struct LinkEvent {
    generation: u64,
    kind: LinkEventKind,
}

#[derive(Debug)]
enum LinkEventKind {
    Opened,
    Frame(Vec<u8>),
    /// Connection ended: `None` when the peer closed it cleanly
    Closed(Option<ClientError>),
}

/// The current connection generation
struct Link {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Connection lifecycle state machine
pub struct Supervisor {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    heartbeat: Arc<HeartbeatTracker>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<LinkEvent>,
    generation: u64,
    current: Option<Link>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Spawn the supervisor task.
    ///
    /// The heartbeat starts now, and the first connection is opened
    /// immediately. The staleness check first runs one `check_interval` later.
    pub fn spawn(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn Executor>,
    ) -> SupervisorChannels {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let heartbeat = Arc::new(HeartbeatTracker::new());
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            dispatcher: Dispatcher::new(Arc::clone(&heartbeat), executor),
            heartbeat: Arc::clone(&heartbeat),
            config,
            transport,
            state: state_tx,
            events: events_tx,
            generation: 0,
            current: None,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(supervisor.run(events_rx, commands_rx));

        SupervisorChannels { state: state_rx, heartbeat, commands: commands_tx, cancel, task }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<LinkEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        info!(
            endpoint = %self.config.endpoint,
            check_interval = ?self.config.check_interval,
            staleness_threshold = ?self.config.staleness_threshold,
            "Supervisor started"
        );

        self.open().await;

        let period = self.config.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Biased so frames already queued (a pong in particular) are
            // dispatched before a tick that became due at the same time.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Supervisor cancelled");
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event),
                Some(command) = commands.recv() => match command {
                    Command::Reconnect => self.reconnect(ReconnectReason::Requested).await,
                },
                _ = ticker.tick() => self.check_alive().await,
            }
        }

        self.close_current().await;
        self.set_state(ConnectionState::Disconnected);
        info!(generations = self.generation, "Supervisor stopped");
    }

    /// Staleness tick: reopen when the peer went quiet or the link is down.
    async fn check_alive(&mut self) {
        match self.heartbeat.ensure_fresh(self.config.staleness_threshold) {
            Err(stale) => {
                warn!(
                    elapsed_secs = self.heartbeat.seconds_since_last_pong(),
                    "{}, reopening connection",
                    stale
                );
                self.reconnect(ReconnectReason::Stale).await;
            }
            Ok(()) if *self.state.borrow() == ConnectionState::Disconnected => {
                self.reconnect(ReconnectReason::TransportLost).await;
            }
            Ok(()) => {
                trace!(elapsed_secs = self.heartbeat.seconds_since_last_pong(), "Connection alive");
            }
        }
    }

    async fn reconnect(&mut self, reason: ReconnectReason) {
        self.set_state(ConnectionState::Reconnecting);
        info!(
            endpoint = %self.config.endpoint,
            %reason,
            attempt = self.generation + 1,
            "Reconnecting"
        );
        self.open().await;
    }

    /// Replace the current connection with a new generation.
    ///
    /// The previous link is fully closed before the new one starts, so at most
    /// one connection is ever open.
    async fn open(&mut self) {
        self.close_current().await;

        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Connecting);

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(link_task(
            generation,
            self.config.endpoint.clone(),
            Arc::clone(&self.transport),
            self.events.clone(),
            cancel.clone(),
        ));

        debug!(generation, endpoint = %self.config.endpoint, "Link spawned");
        self.current = Some(Link { generation, cancel, task });
    }

    /// Cancel the current link and wait for it to close its connection.
    async fn close_current(&mut self) {
        let Some(link) = self.current.take() else {
            return;
        };

        link.cancel.cancel();
        if let Err(e) = link.task.await {
            error!(generation = link.generation, "Link task failed: {}", e);
        }
        debug!(generation = link.generation, "Link closed");
    }

    fn handle_event(&mut self, event: LinkEvent) {
        if event.generation != self.generation {
            trace!(
                generation = event.generation,
                current = self.generation,
                "Dropping event from retired connection"
            );
            return;
        }

        match event.kind {
            LinkEventKind::Opened => {
                info!(generation = event.generation, endpoint = %self.config.endpoint, "Connection open");
                self.set_state(ConnectionState::Connected);
            }
            LinkEventKind::Frame(frame) => {
                if let Err(e) = self.dispatcher.on_message(&frame) {
                    warn!(
                        generation = event.generation,
                        bytes = frame.len(),
                        "Dropping malformed frame: {}",
                        e
                    );
                }
            }
            LinkEventKind::Closed(reason) => {
                match reason {
                    Some(e) => warn!(generation = event.generation, "Connection lost: {}", e),
                    None => info!(generation = event.generation, "Connection closed by peer"),
                }
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "State transition");
            *state = next;
            true
        });
    }
}

/// Connects one generation and forwards its frames until cancelled or lost.
async fn link_task(
    generation: u64,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(generation, "Link cancelled while connecting");
            return;
        }
        result = transport.connect(&endpoint) => result,
    };

    let mut connection = match connected {
        Ok(connection) => connection,
        Err(e) => {
            forward(&events, &cancel, generation, LinkEventKind::Closed(Some(e))).await;
            return;
        }
    };

    if forward(&events, &cancel, generation, LinkEventKind::Opened).await {
        read_frames(generation, connection.as_mut(), &events, &cancel).await;
    }

    if let Err(e) = connection.close().await {
        debug!(generation, "Ignoring close error: {}", e);
    }
}

async fn read_frames(
    generation: u64,
    connection: &mut dyn Connection,
    events: &mpsc::Sender<LinkEvent>,
    cancel: &CancellationToken,
) {
    let mut frames = 0u64;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connection.next_frame() => result,
        };

        let kind = match result {
            Ok(Some(frame)) => {
                frames += 1;
                LinkEventKind::Frame(frame)
            }
            Ok(None) => LinkEventKind::Closed(None),
            Err(e) => LinkEventKind::Closed(Some(e)),
        };

        let done = matches!(kind, LinkEventKind::Closed(_));
        if !forward(events, cancel, generation, kind).await || done {
            break;
        }
    }

    debug!(generation, frames, "Link reader ended");
}

/// Send an event unless the link is cancelled first. Returns `false` if the
/// event could not be delivered.
async fn forward(
    events: &mpsc::Sender<LinkEvent>,
    cancel: &CancellationToken,
    generation: u64,
    kind: LinkEventKind,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = events.send(LinkEvent { generation, kind }) => sent.is_ok(),
    }
}
