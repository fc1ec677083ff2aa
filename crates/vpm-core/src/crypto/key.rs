//! Session key generation and password-based key derivation.
//!
//! # One key for everybody
//!
//! VPM uses a single symmetric key per deployment: the server and every
//! connected client hold the same 32 bytes.  There is no per-client key and
//! no rotation; the key is created when the server or client is constructed
//! and never changes afterwards.
//!
//! The key is either random ([`SessionKey::generate`]) or derived from a
//! shared password with PBKDF2-HMAC-SHA256 ([`derive_key`]).  Both peers must
//! use the same salt to arrive at the same key, so [`SessionKey::from_password`]
//! pins the well-known [`SHARED_SALT`].  With a public salt the security of
//! the channel rests on the password alone.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

/// Length of the session key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Number of PBKDF2 rounds applied to the password.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Length of a randomly generated salt in bytes.
pub const SALT_LEN: usize = 16;

/// Salt used by both server and client when deriving from a shared password.
pub const SHARED_SALT: &[u8] = b"fixed_salt_for_demo";

/// A 256-bit symmetric key shared by the server and all clients.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Wraps existing key material.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derives the key from `password` with the [`SHARED_SALT`].
    ///
    /// This is how both the server and client turn the configured password
    /// into the same key without exchanging a salt.
    pub fn from_password(password: &str) -> Self {
        derive_key(password, Some(SHARED_SALT)).0
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derives a 32-byte key from `password` using PBKDF2-HMAC-SHA256.
///
/// When `salt` is `None` a random 16-byte salt is generated.  The salt that
/// was actually used is always returned, since any peer needs it to
/// reproduce the same key.
///
/// # Examples
///
/// ```rust
/// use vpm_core::{derive_key, SHARED_SALT};
///
/// let (a, _) = derive_key("secret_password", Some(SHARED_SALT));
/// let (b, salt) = derive_key("secret_password", Some(SHARED_SALT));
/// assert_eq!(a, b);
/// assert_eq!(salt, SHARED_SALT);
/// ```
pub fn derive_key(password: &str, salt: Option<&[u8]>) -> (SessionKey, Vec<u8>) {
    let salt = match salt {
        Some(s) => s.to_vec(),
        None => {
            let mut s = vec![0u8; SALT_LEN];
            OsRng.fill_bytes(&mut s);
            s
        }
    };

    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
    (SessionKey(key), salt)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
