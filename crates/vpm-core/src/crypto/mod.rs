//! Cryptographic primitives: the session key and the cipher engine.

pub mod cipher;
pub mod key;

pub use cipher::{CipherEngine, CipherError, BLOCK_SIZE, IV_LEN};
pub use key::{derive_key, SessionKey, KEY_LEN, PBKDF2_ITERATIONS, SHARED_SALT};
