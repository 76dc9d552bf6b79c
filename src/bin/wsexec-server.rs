//! Command server host.
//!
//! Serves the configured actions to every connected client. Each line read
//! from stdin names an action; its payload is pushed to all open connections.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wsexec::{CommandServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "wsexec-server", version, about = "Command server for wsexec clients")]
struct Args {
    /// YAML config file
    #[arg(long, env = "WSEXEC_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8001
    #[arg(long, env = "WSEXEC_SERVER_LISTEN")]
    listen: Option<SocketAddr>,

    /// Pong period in milliseconds
    #[arg(long, env = "WSEXEC_SERVER_PONG_INTERVAL_MS")]
    pong_interval_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(ms) = self.pong_interval_ms {
            config.pong_interval = Duration::from_millis(ms);
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
    let actions = config.load_actions().context("loading action payloads")?;
    info!(actions = ?actions.keys().collect::<Vec<_>>(), "Actions loaded");

    let server = CommandServer::bind(&config).await?;
    info!(endpoint = %server.endpoint_uri(), "Type an action name to broadcast it");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line.context("reading stdin")? {
                Some(line) => {
                    let name = line.trim();
                    if name.is_empty() {
                        continue;
                    }
                    match actions.get(name) {
                        Some(payload) => {
                            let serial = server.broadcast(payload.as_str());
                            info!(action = name, serial, live = server.live(), "Broadcast action");
                        }
                        None => warn!(action = name, "Unknown action"),
                    }
                }
                None => {
                    info!("Stdin closed; serving until interrupted");
                    stdin_open = false;
                }
            },
        }
    }

    server.shutdown().await?;
    Ok(())
}
