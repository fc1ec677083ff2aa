//! TOML-based configuration for the client.
//!
//! ```toml
//! [client]
//! server_host = "127.0.0.1"
//! server_port = 8080
//! password = "secret_password"
//! framing = "length_prefixed"
//! log_level = "info"
//! ```
//!
//! Missing fields fall back to their defaults; a missing file yields the
//! default configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpm_core::{derive_key, Framing, SessionKey, DEFAULT_PORT, SHARED_SALT};

use crate::infrastructure::network::EndpointConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level client configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
}

/// The `[client]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Shared password; must match the server's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Salt for key derivation; defaults to the well-known shared salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            password: None,
            salt: None,
            framing: Framing::default(),
            log_level: default_log_level(),
        }
    }
}

impl ClientSettings {
    /// Derives the session key from the password, if one is configured.
    pub fn session_key(&self) -> Option<SessionKey> {
        let password = self.password.as_deref()?;
        let salt = self
            .salt
            .as_deref()
            .map(str::as_bytes)
            .unwrap_or(SHARED_SALT);
        Some(derive_key(password, Some(salt)).0)
    }

    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            framing: self.framing,
        }
    }
}

/// Parses a configuration from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<ClientConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the configuration at `path`, returning defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
