//! Envelope codec: [`Message`] ⇄ encrypted envelope bytes.
//!
//! Encoding serializes the message to JSON, encrypts it with the
//! [`CipherEngine`] and returns the base64 envelope text as bytes, ready to be
//! written as one frame.  Decoding reverses the three steps and reports which
//! one failed.

use thiserror::Error;

use crate::crypto::cipher::{CipherEngine, CipherError};
use crate::protocol::message::Message;

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame bytes are not UTF-8 text, so they cannot be base64.
    #[error("envelope is not text: {0}")]
    NotText(#[from] std::str::Utf8Error),

    /// The envelope could not be decoded or decrypted.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The plaintext is not a JSON object, or the message failed to serialize.
    #[error("message JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes and encrypts `message`, returning the envelope text bytes.
///
/// # Errors
///
/// Returns [`EnvelopeError::Json`] if the message cannot be serialized.
///
/// # Examples
///
/// ```rust
/// use vpm_core::{decode_envelope, encode_envelope, CipherEngine, Message, SessionKey};
///
/// let engine = CipherEngine::new(SessionKey::generate());
/// let msg = Message::new("hello");
/// let bytes = encode_envelope(&engine, &msg).unwrap();
/// assert_eq!(decode_envelope(&engine, &bytes).unwrap(), msg);
/// ```
pub fn encode_envelope(cipher: &CipherEngine, message: &Message) -> Result<Vec<u8>, EnvelopeError> {
    let plaintext = message.to_json()?;
    Ok(cipher.encrypt(&plaintext).into_bytes())
}

/// Decrypts and deserializes one envelope.
///
/// # Errors
///
/// Returns [`EnvelopeError`] naming the stage that failed.
pub fn decode_envelope(cipher: &CipherEngine, bytes: &[u8]) -> Result<Message, EnvelopeError> {
    let text = std::str::from_utf8(bytes)?;
    let plaintext = cipher.decrypt(text)?;
    Ok(Message::from_json(&plaintext)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::SessionKey;

    #[test]
    fn test_encode_then_decode_returns_same_message() {
        let engine = CipherEngine::new(SessionKey::generate());
        let msg = Message::new("hello").with("content", "Hello from client!");

        let bytes = encode_envelope(&engine, &msg).unwrap();

        assert_eq!(decode_envelope(&engine, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_encoded_envelope_is_base64_text() {
        let engine = CipherEngine::new(SessionKey::generate());
        let bytes = encode_envelope(&engine, &Message::new("x")).unwrap();
        assert!(bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')));
    }

    #[test]
    fn test_decode_rejects_non_utf8_bytes() {
        let engine = CipherEngine::new(SessionKey::generate());
        let result = decode_envelope(&engine, &[0xFF, 0xFE, 0x00]);
        assert!(matches!(result, Err(EnvelopeError::NotText(_))));
    }

    #[test]
    fn test_decode_reports_cipher_failure() {
        let engine = CipherEngine::new(SessionKey::generate());
        let result = decode_envelope(&engine, b"@@@@");
        assert!(matches!(
            result,
            Err(EnvelopeError::Cipher(CipherError::Decode(_)))
        ));
    }

    #[test]
    fn test_decode_reports_json_failure_for_non_object_plaintext() {
        // Arrange: a valid envelope around plaintext that is not a JSON object.
        let engine = CipherEngine::new(SessionKey::generate());
        let envelope = engine.encrypt(b"[1,2,3]");

        // Act
        let result = decode_envelope(&engine, envelope.as_bytes());

        // Assert
        assert!(matches!(result, Err(EnvelopeError::Json(_))));
    }
}
