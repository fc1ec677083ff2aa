//! vpm-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does vpm-server do? (for beginners)
//!
//! The *server* is the hub of a VPM deployment.  It listens on one TCP port
//! and every client connects to it.  For each connection the server:
//!
//! 1. Sends a handshake challenge and accepts the client's answer.
//! 2. Records the connection in a registry under the client id `"ip:port"`.
//! 3. Decrypts every envelope the client sends and hands the resulting
//!    [`vpm_core::Message`] to the application as a `ServerEvent`.
//!
//! The application can answer one client (`send_to`) or all of them at once
//! (`broadcast`).  Every message in both directions is encrypted with the one
//! key shared by the server and all clients.

/// Infrastructure layer: network sockets and configuration storage.
pub mod infrastructure;

pub use infrastructure::network::{
    BroadcastMode, ServerError, ServerEvent, ServerNetworkConfig, VpmServer,
};
