//! VPM server entry point.
//!
//! Listens for client connections, logs every message a client sends, and
//! shuts down gracefully on Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! vpm-server [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   TOML config file [default: vpm-server.toml]
//!   --host      <IP>     Address to bind
//!   --port      <PORT>   Port to listen on
//!   --password  <PW>     Shared password the key is derived from
//!   --framing   <MODE>   length_prefixed | single_read
//!   --broadcast <MODE>   lock_held | snapshot
//!   --log-level <LEVEL>  Fallback log level when RUST_LOG is unset
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Description                      |
//! |-----------------------|----------------------------------|
//! | `VPM_SERVER_CONFIG`   | Path to the TOML config file     |
//! | `VPM_HOST`            | Bind address                     |
//! | `VPM_PORT`            | Listen port                      |
//! | `VPM_PASSWORD`        | Shared password                  |
//!
//! CLI args take precedence over the environment, which takes precedence
//! over the config file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vpm_core::{CipherEngine, Framing, SessionKey};
use vpm_server::infrastructure::storage::config::{load_config, ServerSettings};
use vpm_server::{BroadcastMode, ServerEvent, VpmServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// VPM encrypted messaging server.
#[derive(Debug, Parser)]
#[command(
    name = "vpm-server",
    about = "Encrypted TCP messaging server",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "vpm-server.toml", env = "VPM_SERVER_CONFIG")]
    config: PathBuf,

    /// IP address to bind the listener to.
    #[arg(long, env = "VPM_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "VPM_PORT")]
    port: Option<u16>,

    /// Shared password; clients must use the same one.
    #[arg(long, env = "VPM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Wire framing: `length_prefixed` or `single_read`.
    #[arg(long)]
    framing: Option<Framing>,

    /// Broadcast locking: `lock_held` or `snapshot`.
    #[arg(long)]
    broadcast: Option<BroadcastMode>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    fn into_server_settings(self) -> anyhow::Result<ServerSettings> {
        let mut settings = load_config(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?
            .server;

        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(password) = self.password {
            settings.password = Some(password);
        }
        if let Some(framing) = self.framing {
            settings.framing = framing;
        }
        if let Some(broadcast) = self.broadcast {
            settings.broadcast = broadcast;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        Ok(settings)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_server_settings()?;

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    let network_config = settings
        .network_config()
        .context("invalid server address")?;

    let key = match settings.session_key() {
        Some(key) => key,
        None => {
            warn!("no password configured; using a random key that no client can derive");
            SessionKey::generate()
        }
    };

    let (server, mut events) = VpmServer::new(network_config, CipherEngine::shared(key));
    let addr = server.start().await.context("failed to start VPM server")?;
    info!("VPM server started on {addr}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerEvent::ClientConnected { client_id, address }) => {
                    info!("client {client_id} connected from {address}");
                }
                Some(ServerEvent::MessageReceived { client_id, message }) => {
                    info!("Message from {client_id}: {message}");
                }
                Some(ServerEvent::ClientDisconnected { client_id }) => {
                    info!("client {client_id} disconnected");
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down server"),
                    Err(e) => error!("failed to listen for Ctrl+C: {e}"),
                }
                break;
            }
        }
    }

    server.stop().await;
    Ok(())
}
