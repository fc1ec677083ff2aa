//! AES-256-CBC cipher engine producing base64 envelope text.
//!
//! Envelope layout before text encoding:
//! ```text
//! [iv:16][ciphertext:16*k]   k >= 1
//! ```
//! The IV is drawn fresh from the OS RNG on every call.  Plaintext is padded
//! with `n = 16 - (len % 16)` copies of the byte `n`, so an already aligned
//! plaintext gains a whole block of padding and the ciphertext is never
//! empty.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::crypto::key::SessionKey;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of the initialization vector prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// Errors returned when an envelope cannot be opened.
///
/// Both variants are per-message failures; the connection that received the
/// envelope decides what to do with them.
#[derive(Debug, Error, PartialEq)]
pub enum CipherError {
    /// The envelope text is not valid base64.
    #[error("envelope is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded envelope cannot be decrypted or unpadded.
    #[error("decryption failed: {reason}")]
    Decrypt { reason: String },
}

impl CipherError {
    fn decrypt(reason: impl Into<String>) -> Self {
        CipherError::Decrypt {
            reason: reason.into(),
        }
    }
}

/// Stateless-per-call symmetric cipher bound to one [`SessionKey`].
///
/// The engine is cheap to share: wrap it in an `Arc` and hand the same
/// instance to every connection that uses the session key.
#[derive(Debug, Clone)]
pub struct CipherEngine {
    key: SessionKey,
}

impl CipherEngine {
    /// Creates an engine for `key`.
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    /// Convenience constructor returning an engine ready to be shared.
    pub fn shared(key: SessionKey) -> Arc<Self> {
        Arc::new(Self::new(key))
    }

    /// Returns the key this engine encrypts with.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Encrypts `plaintext` and returns `base64(iv || ciphertext)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vpm_core::{CipherEngine, SessionKey};
    ///
    /// let engine = CipherEngine::new(SessionKey::generate());
    /// let envelope = engine.encrypt(b"hello");
    /// assert_eq!(engine.decrypt(&envelope).unwrap(), b"hello");
    /// ```
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = *self.key.as_bytes();
        // PKCS#7 is exactly the `n` copies of `n` scheme described above.
        let ciphertext =
            Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut raw = Vec::with_capacity(IV_LEN + ciphertext.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);
        STANDARD.encode(raw)
    }

    /// Decrypts envelope text produced by [`CipherEngine::encrypt`].
    ///
    /// Padding is removed by reading the final byte as the pad length; the
    /// other pad bytes are not inspected.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decode`] if `envelope` is not base64, and
    /// [`CipherError::Decrypt`] if the decoded length is not `16 + 16*k`
    /// (`k >= 1`) or the pad length falls outside `1..=16`.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, CipherError> {
        let raw = STANDARD.decode(envelope.trim())?;

        if raw.len() < IV_LEN + BLOCK_SIZE {
            return Err(CipherError::decrypt(format!(
                "envelope too short: {} bytes",
                raw.len()
            )));
        }
        let (iv, ciphertext) = raw.split_at(IV_LEN);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::decrypt(format!(
                "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CipherError::decrypt("malformed initialization vector"))?;
        let key = *self.key.as_bytes();
        let mut padded = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| CipherError::decrypt("block decryption failed"))?;

        let pad_len = usize::from(padded.last().copied().unwrap_or(0));
        if pad_len == 0 || pad_len > BLOCK_SIZE {
            return Err(CipherError::decrypt(format!("invalid pad length {pad_len}")));
        }
        padded.truncate(padded.len() - pad_len);
        Ok(padded)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
