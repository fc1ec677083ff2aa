//! TOML-based configuration for the server.
//!
//! Example file:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! password = "secret_password"
//! framing = "length_prefixed"   # or "single_read"
//! broadcast = "lock_held"       # or "snapshot"
//! log_level = "info"
//! ```
//!
//! Every field has a serde default, so a partial file (or no file at all)
//! still yields a complete configuration.  Command-line flags are applied on
//! top by `main.rs`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpm_core::{derive_key, Framing, SessionKey, DEFAULT_PORT, SHARED_SALT};

use crate::infrastructure::network::{BroadcastMode, ServerNetworkConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `host:port` is not a valid socket address.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
}

/// The `[server]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared password.  When absent a random key is generated and no
    /// client can derive it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Salt for key derivation; defaults to the well-known shared salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default)]
    pub broadcast: BroadcastMode,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            salt: None,
            framing: Framing::default(),
            broadcast: BroadcastMode::default(),
            log_level: default_log_level(),
        }
    }
}

impl ServerSettings {
    /// Parses `host:port` into the listener address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.host, self.port);
        text.parse().map_err(|_| ConfigError::InvalidAddress(text))
    }

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

    /// Builds the network configuration handed to `VpmServer::new`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] for a malformed host.
    pub fn network_config(&self) -> Result<ServerNetworkConfig, ConfigError> {
        Ok(ServerNetworkConfig {
            bind_addr: self.bind_addr()?,
            framing: self.framing,
            broadcast_mode: self.broadcast,
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses a configuration from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the configuration at `path`, returning defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_reference_deployment() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.password, None);
        assert_eq!(cfg.server.framing, Framing::LengthPrefixed);
        assert_eq!(cfg.server.broadcast, BroadcastMode::LockHeld);
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_missing_fields() {
        let cfg = parse_config("[server]\nport = 9000\nbroadcast = \"snapshot\"\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.broadcast, BroadcastMode::Snapshot);
    }

    #[test]
    fn test_full_file_parses_every_field() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            password = "pw"
            salt = "pepper"
            framing = "single_read"
            broadcast = "lock_held"
            log_level = "debug"
        "#;

        let cfg = parse_config(toml).unwrap();

        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.server.password.as_deref(), Some("pw"));
        assert_eq!(cfg.server.salt.as_deref(), Some("pepper"));
        assert_eq!(cfg.server.framing, Framing::SingleRead);
        assert_eq!(cfg.server.log_level, "debug");
    }

    #[test]
    fn test_unknown_framing_is_a_parse_error() {
        let result = parse_config("[server]\nframing = \"carrier_pigeon\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("vpm-server-config-that-does-not-exist.toml");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_load_config_reads_file_from_disk() {
        // Arrange
        let path = std::env::temp_dir().join(format!(
            "vpm-server-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[server]\nport = 8181\n").unwrap();

        // Act
        let cfg = load_config(&path);
        let _ = std::fs::remove_file(&path);

        // Assert
        assert_eq!(cfg.unwrap().server.port, 8181);
    }

    #[test]
    fn test_bind_addr_combines_host_and_port() {
        let settings = ServerSettings::default();
        assert_eq!(settings.bind_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        let settings = ServerSettings {
            host: "not an ip".to_string(),
            ..ServerSettings::default()
        };
        assert!(matches!(
            settings.bind_addr(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_session_key_is_none_without_password() {
        assert!(ServerSettings::default().session_key().is_none());
    }

    #[test]
    fn test_session_key_uses_shared_salt_by_default() {
        let settings = ServerSettings {
            password: Some("secret_password".to_string()),
            ..ServerSettings::default()
        };
        assert_eq!(
            settings.session_key(),
            Some(SessionKey::from_password("secret_password"))
        );
    }

    #[test]
    fn test_custom_salt_changes_the_key() {
        let settings = ServerSettings {
            password: Some("secret_password".to_string()),
            salt: Some("another_salt".to_string()),
            ..ServerSettings::default()
        };
        assert_ne!(
            settings.session_key(),
            Some(SessionKey::from_password("secret_password"))
        );
    }

    #[test]
    fn test_network_config_carries_modes() {
        let settings = ServerSettings {
            framing: Framing::SingleRead,
            broadcast: BroadcastMode::Snapshot,
            ..ServerSettings::default()
        };

        let net = settings.network_config().unwrap();

        assert_eq!(net.framing, Framing::SingleRead);
        assert_eq!(net.broadcast_mode, BroadcastMode::Snapshot);
    }
}
