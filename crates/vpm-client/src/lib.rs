//! vpm-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does vpm-client do? (for beginners)
//!
//! The *client* opens one TCP connection to a VPM server, answers the
//! server's handshake challenge, and from then on exchanges encrypted JSON
//! messages with it.  Both sides derive the same AES key from a shared
//! password, so nothing but ciphertext ever crosses the network after the
//! handshake.
//!
//! The client application:
//!
//! 1. Connects and authenticates (`Endpoint::connect`).
//! 2. Sends messages (`Endpoint::send_message`).
//! 3. Receives messages from a background task and hands them to the caller
//!    as `EndpointEvent`s.
//! 4. Disconnects on request or when the server goes away.

/// Infrastructure layer: the TCP endpoint and configuration storage.
pub mod infrastructure;

pub use infrastructure::network::{
    ConnectionState, Endpoint, EndpointConfig, EndpointError, EndpointEvent,
};
