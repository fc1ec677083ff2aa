//! Protocol module: message type, envelope codec, framing, and handshake.

pub mod envelope;
pub mod framing;
pub mod handshake;
pub mod message;

pub use envelope::{decode_envelope, encode_envelope, EnvelopeError};
pub use framing::{FrameError, Framing, MAX_FRAME_LEN, READ_BUFFER_SIZE};
pub use handshake::{
    AuthError, Authenticator, PlaceholderAuthenticator, Transport, AUTH_RESPONSE, CHALLENGE_LEN,
};
pub use message::Message;
