//! Test utilities shared by unit tests and benchmarks
//!
//! Frame builders for the server's wire events, an executor that records
//! every payload it receives, and an in-memory log capture.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::executor::Executor;

/// Encode a `welcome` event
pub fn welcome_frame(main: u32, patch: u32) -> Vec<u8> {
    json!({"event": "welcome", "version": {"main": main, "patch": patch}}).to_string().into_bytes()
}

/// Encode a `data` event carrying `payload`
pub fn data_frame(payload: &str) -> Vec<u8> {
    json!({"event": "data", "data": payload}).to_string().into_bytes()
}

/// Encode a `pong` event
pub fn pong_frame() -> Vec<u8> {
    br#"{"event":"pong"}"#.to_vec()
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Executor that records payloads in arrival order.
#[derive(Debug)]
pub struct RecordingExecutor {
    payloads: Mutex<Vec<String>>,
    count: watch::Sender<usize>,
}

impl RecordingExecutor {
    /// Executor with nothing recorded yet
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { payloads: Mutex::new(Vec::new()), count }
    }

    /// Snapshot of every payload executed so far
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until at least `count` payloads were executed, or `timeout` passes.
    ///
    /// Returns the payload snapshot either way.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<String> {
        let mut rx = self.count.subscribe();
        let _ = tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count)).await;
        self.payloads()
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, payload: &str) {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner).push(payload.to_string());
        self.count.send_modify(|n| *n += 1);
    }
}

/// One captured log record
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    /// Module path of the call site
    pub target: String,
    /// Formatted message
    pub message: String,
    /// Structured fields other than the message
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of a structured field, as formatted by the subscriber
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }
}

/// Shared store behind [`capture_logs`]
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Every record captured so far
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Records at `level` whose message contains `needle`
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level && event.message.contains(needle))
            .collect()
    }

    /// Number of records at `level` whose message contains `needle`
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.matching(level, needle).len()
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_owned(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.fields.push((field.name().to_owned(), value.to_owned()));
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.logs.events.lock().unwrap_or_else(PoisonError::into_inner).push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Capture every record emitted on the current thread while the guard lives.
///
/// Tasks spawned on a current-thread runtime are polled on the test thread,
/// so their records are captured too.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry()
        .with(CaptureLayer { logs: logs.clone() })
        .with(LevelFilter::TRACE);
    (logs, subscriber.set_default())
}
