//! Executor capability for received commands

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Performs the effect of a `data` command.
///
/// Called synchronously from the dispatch path with the opaque payload. It is
/// fire-and-forget: nothing flows back over the connection, and failures are
/// the executor's own business. Implementations should not block; hand long
/// work off to another task or thread.
///
/// Payloads may be delivered again after a reconnect, so effects should
/// tolerate duplicates.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, payload: &str);
}

impl<F> Executor for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn execute(&self, payload: &str) {
        self(payload)
    }
}

/// Executor that only logs each payload
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

impl Executor for LoggingExecutor {
    fn execute(&self, payload: &str) {
        info!(bytes = payload.len(), "Received command: {}", payload);
    }
}

/// Writes each payload as one line to an async writer.
///
/// Payloads are queued for a writer task, so a stalled reader on the other
/// end never holds up dispatch or the staleness checks running beside it.
#[derive(Debug, Clone)]
pub struct LineWriterExecutor {
    lines: mpsc::UnboundedSender<String>,
}

impl LineWriterExecutor {
    /// Spawn the writer task for `writer`.
    ///
    /// The task ends once every clone of the executor is dropped and the queue
    /// is drained, or at the first write error, which it returns.
    pub fn spawn<W>(mut writer: W) -> (Self, JoinHandle<std::io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (lines, mut queued) = mpsc::unbounded_channel::<String>();

        let task = tokio::spawn(async move {
            while let Some(mut line) = queued.recv().await {
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        (Self { lines }, task)
    }
}

impl Executor for LineWriterExecutor {
    fn execute(&self, payload: &str) {
        if self.lines.send(payload.to_string()).is_err() {
            warn!(bytes = payload.len(), "Line writer stopped, dropping payload");
        }
    }
}
