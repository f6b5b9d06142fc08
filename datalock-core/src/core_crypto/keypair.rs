//! Keypair module
//!
//! Handles the key material behind a lock-key.
//! Uses Ed25519 for signatures and X25519 for sealed-box encryption.
//!
//! The signing keypair is derived deterministically from a 32-byte seed, and
//! the encryption keypair is obtained by converting the signing keypair, so a
//! single seed recovers everything.
//!
//! Security: Secret keys are automatically zeroized on drop using zeroize crate.

use super::{CryptoError, SEED_LEN};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an Ed25519 or X25519 public key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 secret key (seed followed by public key)
pub const SECRET_KEY_LEN: usize = 64;

/// Length of a detached Ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 signing keypair derived from a seed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKeypair {
    #[zeroize(skip)]
    public: [u8; PUBLIC_KEY_LEN],
    secret: [u8; SECRET_KEY_LEN],
}

impl SigningKeypair {
    /// Derive the keypair from a `SEED_LEN`-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let mut seed_bytes: [u8; SEED_LEN] =
            seed.try_into().map_err(|_| CryptoError::InvalidSeedLength {
                expected: SEED_LEN,
                found: seed.len(),
            })?;

        let signing_key = SigningKey::from_bytes(&seed_bytes);
        seed_bytes.zeroize();

        Ok(SigningKeypair {
            public: signing_key.verifying_key().to_bytes(),
            secret: signing_key.to_keypair_bytes(),
        })
    }

    /// Get reference to public key
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public
    }

    /// Get reference to secret key (use carefully!)
    pub fn secret_key(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public", &hex::encode(self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// X25519 keypair converted from an Ed25519 signing keypair
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKeypair {
    #[zeroize(skip)]
    public: [u8; PUBLIC_KEY_LEN],
    secret: [u8; PUBLIC_KEY_LEN],
}

impl EncryptionKeypair {
    /// Convert an Ed25519 keypair to its X25519 counterpart
    ///
    /// The X25519 scalar is the clamped first half of SHA-512(seed), which is
    /// the scalar Ed25519 itself signs with, so the resulting public key is
    /// the Montgomery form of the Ed25519 public key.
    pub fn from_signing(signing: &SigningKeypair) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(&signing.secret[..SEED_LEN]);
        let mut hash = hasher.finalize();

        let mut scalar_bytes = [0u8; PUBLIC_KEY_LEN];
        scalar_bytes.copy_from_slice(&hash[..PUBLIC_KEY_LEN]);
        hash.as_mut_slice().zeroize();

        // Clamp the scalar for X25519
        scalar_bytes[0] &= 248;
        scalar_bytes[31] &= 127;
        scalar_bytes[31] |= 64;

        let x25519_secret = StaticSecret::from(scalar_bytes);
        let x25519_public = X25519PublicKey::from(&x25519_secret);
        scalar_bytes.zeroize();

        EncryptionKeypair {
            public: x25519_public.to_bytes(),
            secret: x25519_secret.to_bytes(),
        }
    }

    /// Get reference to public key
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public
    }

    /// Get reference to secret key (use carefully!)
    pub fn secret_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for EncryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeypair")
            .field("public", &hex::encode(self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Sign a message with a 64-byte Ed25519 secret key
pub fn sign_detached(
    secret: &[u8; SECRET_KEY_LEN],
    msg: &[u8],
) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
    let signing_key = SigningKey::from_keypair_bytes(secret)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Ed25519 secret key: {}", e)))?;
    Ok(signing_key.sign(msg).to_bytes())
}

/// Verify a detached signature
///
/// A malformed public key or a signature of the wrong length is an error; a
/// well-formed signature that does not match verifies as `false`.
pub fn verify_detached(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool, CryptoError> {
    let pubkey: &[u8; PUBLIC_KEY_LEN] = pubkey.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "Public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            pubkey.len()
        ))
    })?;
    let sig: &[u8; SIGNATURE_LEN] =
        sig.try_into().map_err(|_| CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LEN,
            found: sig.len(),
        })?;

    let verifying_key = VerifyingKey::from_bytes(pubkey)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Ed25519 public key: {}", e)))?;

    let signature = Signature::from_bytes(sig);
    Ok(verifying_key.verify(msg, &signature).is_ok())
}
