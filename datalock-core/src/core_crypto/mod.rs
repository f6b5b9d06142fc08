//! Crypto primitives
//!
//! The low-level building blocks the lock-key lifecycle relies on:
//! - seed-based Ed25519 signing keypairs ([`SigningKeypair`])
//! - Ed25519 → X25519 conversion for sealed-box encryption ([`EncryptionKeypair`])
//! - anonymous-sender sealed boxes ([`seal`], [`open`])
//! - detached signatures ([`sign_detached`], [`verify_detached`])
//! - the content hash used for passkey-entry integrity ([`content_hash`])
//! - random entropy ([`generate_entropy`])

mod hash;
mod keypair;
mod sealed_box;

pub use hash::content_hash;
pub use keypair::{
    sign_detached, verify_detached, EncryptionKeypair, SigningKeypair, PUBLIC_KEY_LEN,
    SECRET_KEY_LEN, SIGNATURE_LEN,
};
pub use sealed_box::{open, seal, SEALED_BOX_OVERHEAD};

use rand::RngCore;
use thiserror::Error;

/// Length of the signing seed (the lock-key `iv`).
pub const SEED_LEN: usize = 32;

/// Default number of bytes returned by [`generate_entropy`] callers that
/// have no specific length in mind.
pub const DEFAULT_ENTROPY_LEN: usize = 16;

/// Crypto primitive errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid seed length: expected {expected} bytes, got {found}")]
    InvalidSeedLength { expected: usize, found: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature length: expected {expected} bytes, got {found}")]
    InvalidSignatureLength { expected: usize, found: usize },

    #[error("Seal failed: {0}")]
    Seal(String),

    #[error("Open failed: {0}")]
    Open(String),
}

/// Generate `num_bytes` of cryptographically secure random bytes
pub fn generate_entropy(num_bytes: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; num_bytes];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
