//! Routes decoded inbound messages to their handlers

use std::sync::Arc;

use tracing::{debug, info};

use crate::Result;
use crate::executor::Executor;
use crate::heartbeat::HeartbeatTracker;
use crate::types::{InboundMessage, MessageKind};

/// Classifies inbound frames and routes them by kind.
///
/// - `welcome`: logged, no state change
/// - `data`: payload handed to the [`Executor`]
/// - `pong`: recorded on the [`HeartbeatTracker`]
/// - anything else: logged as unknown
///
/// No message kind closes or reopens the connection; only the supervisor's
/// staleness ticker does that.
#[derive(Clone)]
pub struct Dispatcher {
    heartbeat: Arc<HeartbeatTracker>,
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    /// Route pongs to `heartbeat` and data payloads to `executor`.
    pub fn new(heartbeat: Arc<HeartbeatTracker>, executor: Arc<dyn Executor>) -> Self {
        Self { heartbeat, executor }
    }

    /// Decode a raw frame and dispatch it.
    ///
    /// A malformed frame returns a decode error and leaves all state
    /// untouched; the caller logs and drops it.
    pub fn on_message(&self, raw: &[u8]) -> Result<MessageKind> {
        let message = InboundMessage::decode(raw)?;
        Ok(self.dispatch(message))
    }

    /// Dispatch an already decoded message.
    pub fn dispatch(&self, message: InboundMessage) -> MessageKind {
        let kind = message.kind();
        match message {
            InboundMessage::Welcome { version } => {
                info!(%version, "Connected to command server, version: {}", version);
            }
            InboundMessage::Data { payload } => {
                debug!("Executing data: {}", payload);
                self.executor.execute(&payload);
            }
            InboundMessage::Pong => {
                debug!("Received pong");
                self.heartbeat.record_pong();
            }
            InboundMessage::Unknown { event, raw } => {
                info!(%event, "Unknown event from command server: {}", raw);
            }
        }
        kind
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("heartbeat", &self.heartbeat).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientError;
    use crate::test_utils::{RecordingExecutor, capture_logs, data_frame, pong_frame, welcome_frame};
    use std::sync::Mutex;
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, Arc<RecordingExecutor>, Arc<HeartbeatTracker>) {
        let heartbeat = Arc::new(HeartbeatTracker::new());
        let executor = Arc::new(RecordingExecutor::new());
        let dispatcher = Dispatcher::new(Arc::clone(&heartbeat), executor.clone());
        (dispatcher, executor, heartbeat)
    }

    #[tokio::test]
    async fn routes_each_kind() {
        let (dispatcher, executor, heartbeat) = dispatcher();

        assert_eq!(dispatcher.on_message(&welcome_frame(0, 1)).unwrap(), MessageKind::Welcome);
        assert_eq!(dispatcher.on_message(&data_frame("X")).unwrap(), MessageKind::Data);
        assert_eq!(dispatcher.on_message(&pong_frame()).unwrap(), MessageKind::Pong);

        assert_eq!(executor.payloads(), vec!["X".to_string()]);
        assert_eq!(heartbeat.pong_count(), 1);
    }

    #[tokio::test]
    async fn pong_is_recorded_between_data_calls() {
        let heartbeat = Arc::new(HeartbeatTracker::new());
        let calls: Arc<Mutex<Vec<(String, u64)>>> = Arc::default();

        let observed = Arc::clone(&calls);
        let seen_by_executor = Arc::clone(&heartbeat);
        let executor = move |payload: &str| {
            observed.lock().unwrap().push((payload.to_string(), seen_by_executor.pong_count()));
        };
        let dispatcher = Dispatcher::new(Arc::clone(&heartbeat), Arc::new(executor));

        for frame in [welcome_frame(0, 1), data_frame("X"), pong_frame(), data_frame("Y")] {
            dispatcher.on_message(&frame).unwrap();
        }

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("X".to_string(), 0), ("Y".to_string(), 1)]);
        assert_eq!(heartbeat.pong_count(), 1);
    }

    #[tokio::test]
    async fn unknown_event_changes_nothing() {
        let (dispatcher, executor, heartbeat) = dispatcher();

        let kind = dispatcher.on_message(br#"{"event":"ping"}"#).unwrap();

        assert_eq!(kind, MessageKind::Unknown);
        assert!(executor.payloads().is_empty());
        assert_eq!(heartbeat.pong_count(), 0);
    }

    #[tokio::test]
    async fn unknown_event_is_logged_once() {
        let (logs, _guard) = capture_logs();
        let (dispatcher, _executor, _heartbeat) = dispatcher();

        dispatcher.on_message(br#"{"event":"ping"}"#).unwrap();

        let unknown = logs.matching(tracing::Level::INFO, "Unknown event");
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].field("event"), Some("ping"));
        assert!(unknown[0].message.contains(r#""event":"ping""#));
    }

    #[tokio::test]
    async fn welcome_logs_server_version() {
        let (logs, _guard) = capture_logs();
        let (dispatcher, _executor, _heartbeat) = dispatcher();

        dispatcher.on_message(&welcome_frame(0, 1)).unwrap();

        assert_eq!(logs.count(tracing::Level::INFO, "version: 0.1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_does_not_block_later_frames() {
        let (dispatcher, executor, heartbeat) = dispatcher();
        tokio::time::advance(Duration::from_secs(5)).await;

        let err = dispatcher.on_message(b"{not json").unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
        assert_eq!(heartbeat.since_last_pong(), Duration::from_secs(5));

        dispatcher.on_message(&data_frame("after")).unwrap();
        dispatcher.on_message(&pong_frame()).unwrap();

        assert_eq!(executor.payloads(), vec!["after".to_string()]);
        assert_eq!(heartbeat.since_last_pong(), Duration::ZERO);
    }

    #[tokio::test]
    async fn welcome_does_not_touch_heartbeat() {
        let (dispatcher, executor, heartbeat) = dispatcher();
        dispatcher.dispatch(InboundMessage::decode(&welcome_frame(2, 7)).unwrap());
        assert_eq!(heartbeat.pong_count(), 0);
        assert!(executor.payloads().is_empty());
    }
}
