//! VPM client entry point.
//!
//! Connects to a VPM server, sends a greeting, logs every message the server
//! sends back, and exits when the server disconnects or on Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! vpm-client [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   TOML config file [default: vpm-client.toml]
//!   --host      <HOST>   Server hostname or IP
//!   --port      <PORT>   Server port
//!   --password  <PW>     Shared password the key is derived from
//!   --framing   <MODE>   length_prefixed | single_read
//!   --log-level <LEVEL>  Fallback log level when RUST_LOG is unset
//! ```
//!
//! `VPM_CLIENT_CONFIG`, `VPM_SERVER_HOST`, `VPM_SERVER_PORT`, and
//! `VPM_PASSWORD` may be used instead of the corresponding flags.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vpm_client::infrastructure::storage::config::{load_config, ClientSettings};
use vpm_client::{Endpoint, EndpointEvent};
use vpm_core::{CipherEngine, Framing, Message, SessionKey};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// VPM encrypted messaging client.
#[derive(Debug, Parser)]
#[command(
    name = "vpm-client",
    about = "Encrypted TCP messaging client",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "vpm-client.toml", env = "VPM_CLIENT_CONFIG")]
    config: PathBuf,

    /// Hostname or IP address of the server.
    #[arg(long, env = "VPM_SERVER_HOST")]
    host: Option<String>,

    /// TCP port of the server.
    #[arg(long, env = "VPM_SERVER_PORT")]
    port: Option<u16>,

    /// Shared password; must match the server's.
    #[arg(long, env = "VPM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Wire framing: `length_prefixed` or `single_read`.
    #[arg(long)]
    framing: Option<Framing>,

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
    fn into_client_settings(self) -> anyhow::Result<ClientSettings> {
        let mut settings = load_config(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?
            .client;

        if let Some(host) = self.host {
            settings.server_host = host;
        }
        if let Some(port) = self.port {
            settings.server_port = port;
        }
        if let Some(password) = self.password {
            settings.password = Some(password);
        }
        if let Some(framing) = self.framing {
            settings.framing = framing;
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
    let settings = Cli::parse().into_client_settings()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    let key = match settings.session_key() {
        Some(key) => key,
        None => {
            warn!("no password configured; using a random key the server cannot share");
            SessionKey::generate()
        }
    };

    let (endpoint, mut events) =
        Endpoint::new(settings.endpoint_config(), CipherEngine::shared(key));

    endpoint
        .connect(&settings.server_host, settings.server_port)
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}",
                settings.server_host, settings.server_port
            )
        })?;

    let hello = Message::new("hello").with("content", "Hello from client!");
    endpoint
        .send_message(&hello)
        .await
        .context("failed to send greeting")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EndpointEvent::Connected { peer }) => info!("session open with {peer}"),
                Some(EndpointEvent::MessageReceived(message)) => {
                    info!("Message from server: {message}");
                }
                Some(EndpointEvent::Disconnected) | None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down client"),
                    Err(e) => error!("failed to listen for Ctrl+C: {e}"),
                }
                break;
            }
        }
    }

    endpoint.disconnect().await;
    Ok(())
}
