//! Integration tests for the vpm-core cipher engine and envelope codec.
//!
//! These tests drive the public API only: key derivation, the cipher engine,
//! and the envelope codec together, including one envelope produced by a
//! peer outside this code base.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use vpm_core::{
    decode_envelope, derive_key, encode_envelope, CipherEngine, CipherError, EnvelopeError,
    Message, SessionKey, SHARED_SALT,
};

/// Envelope produced by an independent AES-256-CBC implementation with the
/// key derived from `"secret_password"`, IV `00 01 .. 0f`, and plaintext
/// `{"type": "hello", "content": "Hello from client!"}`.
const FOREIGN_HELLO_ENVELOPE: &str = "AAECAwQFBgcICQoLDA0OD6GR0uN4xWfGgACp79HvN0MrItWTazU9jEJ3cRCWKAr1bAoeqxOQ9TZKRMKV3uToaxTPJ0G4Y09C2GJtRWjWwpE=";

fn password_engine() -> CipherEngine {
    CipherEngine::new(SessionKey::from_password("secret_password"))
}

#[test]
fn test_foreign_envelope_decrypts_to_expected_message() {
    // Arrange
    let engine = password_engine();

    // Act
    let message = decode_envelope(&engine, FOREIGN_HELLO_ENVELOPE.as_bytes())
        .expect("foreign envelope must decode");

    // Assert
    assert_eq!(message.message_type(), Some("hello"));
    assert_eq!(
        message.get("content").and_then(|v| v.as_str()),
        Some("Hello from client!")
    );
    assert_eq!(message.len(), 2);
}

#[test]
fn test_foreign_envelope_plaintext_is_exact() {
    let engine = password_engine();
    let plaintext = engine.decrypt(FOREIGN_HELLO_ENVELOPE).unwrap();
    assert_eq!(
        plaintext,
        br#"{"type": "hello", "content": "Hello from client!"}"#.to_vec()
    );
}

#[test]
fn test_password_key_matches_explicit_shared_salt_derivation() {
    let (derived, salt) = derive_key("secret_password", Some(SHARED_SALT));
    assert_eq!(salt, SHARED_SALT);
    assert_eq!(derived, SessionKey::from_password("secret_password"));
}

#[test]
fn test_two_peers_with_same_password_interoperate() {
    // Arrange: server and client derive independently.
    let server = CipherEngine::new(SessionKey::from_password("hunter2"));
    let client = CipherEngine::new(SessionKey::from_password("hunter2"));
    let msg = Message::new("hello").with("content", "Hello from client!");

    // Act
    let bytes = encode_envelope(&client, &msg).unwrap();
    let received = decode_envelope(&server, &bytes).unwrap();

    // Assert
    assert_eq!(received, msg);
}

#[test]
fn test_different_passwords_cannot_read_each_other() {
    let alice = CipherEngine::new(SessionKey::from_password("alice"));
    let mallory = CipherEngine::new(SessionKey::from_password("mallory"));
    let bytes = encode_envelope(&alice, &Message::new("secret").with("n", 1)).unwrap();

    let result = decode_envelope(&mallory, &bytes);

    assert!(result.is_err(), "a foreign key must not yield the original message");
}

#[test]
fn test_same_message_encrypts_differently_every_time() {
    let engine = CipherEngine::new(SessionKey::generate());
    let msg = Message::new("ping");

    let envelopes: HashSet<Vec<u8>> = (0..64)
        .map(|_| encode_envelope(&engine, &msg).unwrap())
        .collect();

    assert_eq!(envelopes.len(), 64);
}

#[test]
fn test_envelope_decodes_to_iv_plus_ciphertext_blocks() {
    let engine = CipherEngine::new(SessionKey::generate());
    let msg = Message::new("data").with("payload", "x".repeat(100));

    let bytes = encode_envelope(&engine, &msg).unwrap();
    let raw = STANDARD.decode(&bytes).unwrap();

    assert!(raw.len() >= 32);
    assert_eq!(raw.len() % 16, 0);
}

#[test]
fn test_truncated_envelope_is_a_cipher_error() {
    let engine = CipherEngine::new(SessionKey::generate());
    let raw = [0u8; 16];
    let envelope = STANDARD.encode(raw);

    let result = decode_envelope(&engine, envelope.as_bytes());

    assert!(matches!(
        result,
        Err(EnvelopeError::Cipher(CipherError::Decrypt { .. }))
    ));
}
