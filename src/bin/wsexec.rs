//! Command client host.
//!
//! Connects to a command server and writes every received `data` payload to
//! stdout, one per line, so another process can consume them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wsexec::{Client, ClientConfig, Endpoint, LineWriterExecutor};

#[derive(Debug, Parser)]
#[command(name = "wsexec", version, about = "Self-healing WebSocket command client")]
struct Args {
    /// YAML config file
    #[arg(long, env = "WSEXEC_CONFIG")]
    config: Option<PathBuf>,

    /// Command server URI (ws://)
    #[arg(long, env = "WSEXEC_ENDPOINT")]
    endpoint: Option<String>,

    /// Staleness check period in milliseconds
    #[arg(long, env = "WSEXEC_CHECK_INTERVAL_MS")]
    check_interval_ms: Option<u64>,

    /// Silence tolerated before reconnecting, in milliseconds
    #[arg(long, env = "WSEXEC_STALENESS_THRESHOLD_MS")]
    staleness_threshold_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(uri) = &self.endpoint {
            config.endpoint = Endpoint::parse(uri).context("parsing --endpoint")?;
        }
        if let Some(ms) = self.check_interval_ms {
            config.check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.staleness_threshold_ms {
            config.staleness_threshold = Duration::from_millis(ms);
        }

        config.validate().context("validating configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    let (executor, writer) = LineWriterExecutor::spawn(tokio::io::stdout());
    let client = Client::connect(config, Arc::new(executor))?;

    let mut states = Box::pin(client.state_updates());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                info!("Interrupted, shutting down");
                break;
            }
            state = states.next() => match state {
                Some(state) => info!(%state, "Connection state changed"),
                None => break,
            },
        }
    }

    client.shutdown().await?;
    writer.await.context("joining stdout writer")?.context("writing to stdout")?;
    Ok(())
}
