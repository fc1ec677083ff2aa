//! # vpm-core
//!
//! Shared library for VPM containing the cipher engine, the session key,
//! the JSON message type, the encrypted envelope codec, the transport framing
//! layer, and the handshake capability.
//!
//! This crate is used by both the server and client applications.  It owns no
//! listening sockets and spawns no tasks; the only I/O it performs is reading
//! and writing frames on streams handed to it by the caller.
//!
//! # Architecture overview
//!
//! VPM is a small encrypted messaging channel over TCP.  A server accepts many
//! clients, every client shares one symmetric key with the server, and every
//! message after the handshake travels as an encrypted envelope.
//!
//! - **`crypto`** – Key derivation (PBKDF2-HMAC-SHA256) and the AES-256-CBC
//!   cipher engine that turns plaintext bytes into base64 envelope text and
//!   back.
//!
//! - **`protocol`** – What travels over the socket: the [`Message`] mapping,
//!   the envelope codec that combines JSON with the cipher engine, the
//!   [`Framing`] layer that guarantees one read yields one envelope, and the
//!   [`Authenticator`] capability used during the handshake.

pub mod crypto;
pub mod protocol;

pub use crypto::cipher::{CipherEngine, CipherError};
pub use crypto::key::{derive_key, SessionKey, SHARED_SALT};
pub use protocol::envelope::{decode_envelope, encode_envelope, EnvelopeError};
pub use protocol::framing::{FrameError, Framing};
pub use protocol::handshake::{AuthError, Authenticator, PlaceholderAuthenticator, Transport};
pub use protocol::message::Message;

/// Default TCP port shared by server and client.
pub const DEFAULT_PORT: u16 = 8080;
