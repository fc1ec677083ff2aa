//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the server's TOML file and falls back to
//! defaults when the file does not exist yet.

pub mod config;
