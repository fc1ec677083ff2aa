//! Connection handshake behind the [`Authenticator`] capability.
//!
//! Right after the TCP connection is established, and before any envelope
//! is exchanged, the server sends a challenge frame and the client answers
//! with a response frame:
//!
//! ```text
//! Server                                Client
//! ──────                                ──────
//! verify_client()                       answer_server()
//!   send 32 random bytes   ───────────►   read challenge
//!   read response          ◄───────────   send b"authentication-response"
//!   accept
//! ```
//!
//! [`PlaceholderAuthenticator`] verifies nothing: the response is not derived
//! from the challenge and any response (or none at all) is accepted.  The
//! connection code only talks to the [`Authenticator`] trait, so a verifying
//! implementation can replace it without touching the connection lifecycle.

use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::protocol::framing::{FrameError, Framing};

/// Length of the random challenge sent by the server.
pub const CHALLENGE_LEN: usize = 32;

/// Fixed response written by the placeholder client handshake.
pub const AUTH_RESPONSE: &[u8] = b"authentication-response";

/// Errors raised by a handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Reading or writing a handshake frame failed.
    #[error("handshake transport error: {0}")]
    Transport(#[from] FrameError),

    /// The peer closed the connection before the handshake finished.
    #[error("peer closed the connection during the handshake")]
    PeerClosed,

    /// The peer answered but was not accepted.
    #[error("authentication rejected: {0}")]
    Rejected(String),
}

/// A bidirectional byte stream the handshake can run on.
///
/// Implemented for every `AsyncRead + AsyncWrite` type, so a `TcpStream`
/// and an in-memory `tokio::io::DuplexStream` both qualify.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Both halves of the connection handshake.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Server side: challenges a freshly accepted client.
    ///
    /// Returning `Ok(())` admits the client.
    async fn verify_client(
        &self,
        stream: &mut dyn Transport,
        framing: Framing,
    ) -> Result<(), AuthError>;

    /// Client side: answers the server's challenge.
    async fn answer_server(
        &self,
        stream: &mut dyn Transport,
        framing: Framing,
    ) -> Result<(), AuthError>;
}

/// The trust-on-connect handshake: challenge and response carry no proof.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAuthenticator;

#[async_trait]
impl Authenticator for PlaceholderAuthenticator {
    async fn verify_client(
        &self,
        stream: &mut dyn Transport,
        framing: Framing,
    ) -> Result<(), AuthError> {
        let mut challenge = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut challenge);
        framing.write_frame(stream, &challenge).await?;

        // Whatever comes back is accepted, including nothing.
        match framing.read_frame(stream).await? {
            Some(response) => debug!("handshake response of {} bytes accepted", response.len()),
            None => debug!("peer closed before responding; accepting anyway"),
        }
        Ok(())
    }

    async fn answer_server(
        &self,
        stream: &mut dyn Transport,
        framing: Framing,
    ) -> Result<(), AuthError> {
        let challenge = framing
            .read_frame(stream)
            .await?
            .ok_or(AuthError::PeerClosed)?;
        debug!("received {}-byte handshake challenge", challenge.len());

        framing.write_frame(stream, AUTH_RESPONSE).await?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
