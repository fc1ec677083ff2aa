//! Network infrastructure for the server application.
//!
//! # Sub-modules
//!
//! - **`registry`** – `ConnectionRegistry`, the table of authenticated
//!   connections keyed by client id, and the `ConnectionRecord` that owns a
//!   connection's write half.
//!
//! - **`dispatcher`** – `VpmServer`: binds the listener, runs the accept
//!   loop, spawns one handler task per connection, and implements
//!   `send_to`, `broadcast`, and `stop`.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{BroadcastMode, ServerError, ServerEvent, ServerNetworkConfig, VpmServer};
pub use registry::{ConnectedClientInfo, ConnectionRecord, ConnectionRegistry, DeliveryError};
