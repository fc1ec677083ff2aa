//! Infrastructure layer for the server application.
//!
//! # Sub-modules
//!
//! - **`network`** – The listening socket, the per-connection handlers, and
//!   the registry of live connections.
//!
//! - **`storage`** – TOML configuration file loading.

pub mod network;
pub mod storage;
