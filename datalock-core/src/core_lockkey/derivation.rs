//! Lock-key derivation
//!
//! A lock-key is a pure function of its 32-byte seed: the seed gives the
//! Ed25519 signing keypair, which converts to the X25519 sealing keypair.
//!
//! The seed travels inside a passkey's WebAuthn user handle as
//! `seed || u16_be(seq)`, so every passkey of one identity recovers the
//! same key while staying individually addressable.

use super::error::{LockKeyError, LockKeyResult};
use super::key::{KeyCandidate, LockKey};
use crate::core_crypto::{
    generate_entropy, EncryptionKeypair, SigningKeypair, PUBLIC_KEY_LEN, SECRET_KEY_LEN, SEED_LEN,
};
use zeroize::Zeroizing;

/// Lock-key format produced by this crate
pub const CURRENT_KEY_FORMAT_VERSION: u32 = 1;

/// Length of a user handle: seed plus a two-byte sequence number
pub const USER_HANDLE_LEN: usize = SEED_LEN + 2;

/// Derive a lock-key from `seed`, or from a fresh random seed
pub fn derive_lock_key(seed: Option<&[u8]>) -> LockKeyResult<LockKey> {
    let fresh;
    let seed = match seed {
        Some(seed) => seed,
        None => {
            fresh = Zeroizing::new(generate_entropy(SEED_LEN));
            fresh.as_slice()
        }
    };

    let signing = SigningKeypair::from_seed(seed).map_err(LockKeyError::Derivation)?;
    let encryption = EncryptionKeypair::from_signing(&signing);

    let mut iv = [0u8; SEED_LEN];
    iv.copy_from_slice(seed);

    Ok(LockKey::from_parts(
        CURRENT_KEY_FORMAT_VERSION,
        iv,
        *signing.public_key(),
        *signing.secret_key(),
        *encryption.public_key(),
        *encryption.secret_key(),
    ))
}

/// Accept an externally supplied key
///
/// A complete current-format key is taken as is. Otherwise a seed of the
/// right length is re-derived from, ignoring every other field.
pub fn validate_external_key(candidate: &KeyCandidate) -> LockKeyResult<LockKey> {
    if candidate.key_format_version == Some(CURRENT_KEY_FORMAT_VERSION) {
        if let Some(key) = complete_key(candidate) {
            return Ok(key);
        }
    }

    match candidate.iv.as_deref() {
        Some(iv) if iv.len() == SEED_LEN => derive_lock_key(Some(iv)),
        _ => Err(LockKeyError::UnrecognizedKey),
    }
}

fn complete_key(candidate: &KeyCandidate) -> Option<LockKey> {
    fn field<const N: usize>(value: &Option<Vec<u8>>) -> Option<[u8; N]> {
        value.as_deref()?.try_into().ok()
    }

    Some(LockKey::from_parts(
        CURRENT_KEY_FORMAT_VERSION,
        field::<SEED_LEN>(&candidate.iv)?,
        field::<PUBLIC_KEY_LEN>(&candidate.public_key)?,
        field::<SECRET_KEY_LEN>(&candidate.private_key)?,
        field::<PUBLIC_KEY_LEN>(&candidate.enc_pk)?,
        field::<PUBLIC_KEY_LEN>(&candidate.enc_sk)?,
    ))
}

/// User handle registered with passkey number `seq`
pub fn encode_user_handle(key: &LockKey, seq: u16) -> Vec<u8> {
    let mut handle = Vec::with_capacity(USER_HANDLE_LEN);
    handle.extend_from_slice(key.iv());
    handle.extend_from_slice(&seq.to_be_bytes());
    handle
}

/// Seed carried by a user handle; `None` unless the handle is exactly
/// `USER_HANDLE_LEN` bytes
pub fn seed_from_user_handle(handle: &[u8]) -> Option<&[u8]> {
    if handle.len() == USER_HANDLE_LEN {
        Some(&handle[..SEED_LEN])
    } else {
        None
    }
}

/// Sequence number carried by a user handle
pub fn seq_from_user_handle(handle: &[u8]) -> Option<u16> {
    if handle.len() == USER_HANDLE_LEN {
        Some(u16::from_be_bytes([handle[SEED_LEN], handle[SEED_LEN + 1]]))
    } else {
        None
    }
}
