//! Infrastructure layer for the client application.
//!
//! # Sub-modules
//!
//! - **`network`** – The [`network::Endpoint`]: TCP connect, handshake,
//!   background receive loop, and encrypted sends.
//!
//! - **`storage`** – TOML configuration file loading.

pub mod network;
pub mod storage;
