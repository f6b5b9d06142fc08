//! Anonymous-sender sealed boxes
//!
//! `seal` encrypts to an X25519 public key using a fresh ephemeral keypair;
//! only the holder of the matching secret key can `open` the result.
//!
//! Wire layout: `ephemeral_pk (32) || nonce (24) || ciphertext+tag`.

use super::{CryptoError, PUBLIC_KEY_LEN};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const BOX_KEY_INFO: &[u8] = b"datalock:sealed-box:v1";

/// Bytes a sealed box adds on top of its plaintext
pub const SEALED_BOX_OVERHEAD: usize = PUBLIC_KEY_LEN + NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` so that only `recipient_pk`'s owner can read it
pub fn seal(plaintext: &[u8], recipient_pk: &[u8; PUBLIC_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let mut rng = rand::rng();

    let mut ephemeral_bytes = [0u8; PUBLIC_KEY_LEN];
    rng.fill_bytes(&mut ephemeral_bytes);
    let ephemeral_secret = StaticSecret::from(ephemeral_bytes);
    ephemeral_bytes.zeroize();
    let ephemeral_pk = X25519PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(*recipient_pk));
    if !shared.was_contributory() {
        return Err(CryptoError::Seal("Recipient key is a low-order point".to_string()));
    }

    let key = derive_box_key(shared.as_bytes(), ephemeral_pk.as_bytes(), recipient_pk)
        .map_err(CryptoError::Seal)?;

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ephemeral_pk.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::Seal(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(SEALED_BOX_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed box addressed to `recipient_pk`
pub fn open(
    sealed: &[u8],
    recipient_pk: &[u8; PUBLIC_KEY_LEN],
    recipient_sk: &[u8; PUBLIC_KEY_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_BOX_OVERHEAD {
        return Err(CryptoError::Open(format!(
            "Sealed box too short: {} bytes",
            sealed.len()
        )));
    }

    let (epk_bytes, rest) = sealed.split_at(PUBLIC_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut epk = [0u8; PUBLIC_KEY_LEN];
    epk.copy_from_slice(epk_bytes);

    let secret = StaticSecret::from(*recipient_sk);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(epk));
    if !shared.was_contributory() {
        return Err(CryptoError::Open("Ephemeral key is a low-order point".to_string()));
    }

    let key = derive_box_key(shared.as_bytes(), &epk, recipient_pk).map_err(CryptoError::Open)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &epk,
            },
        )
        .map_err(|_| CryptoError::Open("Authentication failed".to_string()))
}

fn derive_box_key(
    shared: &[u8; 32],
    ephemeral_pk: &[u8; PUBLIC_KEY_LEN],
    recipient_pk: &[u8; PUBLIC_KEY_LEN],
) -> Result<Zeroizing<[u8; 32]>, String> {
    let mut salt = [0u8; PUBLIC_KEY_LEN * 2];
    salt[..PUBLIC_KEY_LEN].copy_from_slice(ephemeral_pk);
    salt[PUBLIC_KEY_LEN..].copy_from_slice(recipient_pk);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(BOX_KEY_INFO, okm.as_mut_slice())
        .map_err(|e| format!("Key derivation failed: {}", e))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::{generate_entropy, EncryptionKeypair, SigningKeypair, SEED_LEN};

    fn recipient() -> EncryptionKeypair {
        let signing = SigningKeypair::from_seed(&generate_entropy(SEED_LEN)).unwrap();
        EncryptionKeypair::from_signing(&signing)
    }

    #[test]
    fn test_seal_open() {
        let kp = recipient();
        let sealed = seal(b"top secret", kp.public_key()).unwrap();
        assert_eq!(sealed.len(), SEALED_BOX_OVERHEAD + 10);

        let opened = open(&sealed, kp.public_key(), kp.secret_key()).unwrap();
        assert_eq!(opened, b"top secret");
    }

    #[test]
    fn test_seal_is_randomized() {
        let kp = recipient();
        let a = seal(b"same", kp.public_key()).unwrap();
        let b = seal(b"same", kp.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let kp = recipient();
        let other = recipient();
        let sealed = seal(b"data", kp.public_key()).unwrap();

        let result = open(&sealed, other.public_key(), other.secret_key());
        assert!(matches!(result, Err(CryptoError::Open(_))));
    }

    #[test]
    fn test_open_detects_tampering() {
        let kp = recipient();
        let mut sealed = seal(b"data", kp.public_key()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(open(&sealed, kp.public_key(), kp.secret_key()).is_err());
    }

    #[test]
    fn test_open_rejects_truncated_box() {
        let kp = recipient();
        let result = open(&[0u8; 20], kp.public_key(), kp.secret_key());
        assert!(matches!(result, Err(CryptoError::Open(_))));
    }
}
