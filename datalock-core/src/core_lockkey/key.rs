//! Lock-key material

use crate::core_crypto::{PUBLIC_KEY_LEN, SECRET_KEY_LEN, SEED_LEN};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key material derived from a single seed
///
/// Holds the Ed25519 signing keypair and the X25519 keypair converted from
/// it. Never persisted; recovered from a passkey's user handle.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LockKey {
    #[zeroize(skip)]
    key_format_version: u32,
    iv: [u8; SEED_LEN],
    #[zeroize(skip)]
    public_key: [u8; PUBLIC_KEY_LEN],
    private_key: [u8; SECRET_KEY_LEN],
    #[zeroize(skip)]
    enc_pk: [u8; PUBLIC_KEY_LEN],
    enc_sk: [u8; PUBLIC_KEY_LEN],
}

impl LockKey {
    pub(crate) fn from_parts(
        key_format_version: u32,
        iv: [u8; SEED_LEN],
        public_key: [u8; PUBLIC_KEY_LEN],
        private_key: [u8; SECRET_KEY_LEN],
        enc_pk: [u8; PUBLIC_KEY_LEN],
        enc_sk: [u8; PUBLIC_KEY_LEN],
    ) -> Self {
        LockKey {
            key_format_version,
            iv,
            public_key,
            private_key,
            enc_pk,
            enc_sk,
        }
    }

    pub fn key_format_version(&self) -> u32 {
        self.key_format_version
    }

    /// The seed every other field derives from
    pub fn iv(&self) -> &[u8; SEED_LEN] {
        &self.iv
    }

    /// Ed25519 public key
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    /// Ed25519 secret key, seed followed by public key
    pub fn private_key(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.private_key
    }

    /// X25519 public key that data is sealed to
    pub fn enc_pk(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.enc_pk
    }

    /// X25519 secret key that opens sealed data
    pub fn enc_sk(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.enc_sk
    }

    /// Export every field, e.g. to re-import the key elsewhere
    pub fn to_candidate(&self) -> KeyCandidate {
        KeyCandidate {
            key_format_version: Some(self.key_format_version),
            iv: Some(self.iv.to_vec()),
            public_key: Some(self.public_key.to_vec()),
            private_key: Some(self.private_key.to_vec()),
            enc_pk: Some(self.enc_pk.to_vec()),
            enc_sk: Some(self.enc_sk.to_vec()),
        }
    }
}

impl fmt::Debug for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockKey")
            .field("key_format_version", &self.key_format_version)
            .field("public_key", &hex::encode(self.public_key))
            .field("enc_pk", &hex::encode(self.enc_pk))
            .field("iv", &"<redacted>")
            .field("private_key", &"<redacted>")
            .field("enc_sk", &"<redacted>")
            .finish()
    }
}

/// A possibly partial, externally supplied lock-key
///
/// Accepted by `validate_external_key` when it is either a complete
/// current-format key or carries a seed to re-derive from.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyCandidate {
    pub key_format_version: Option<u32>,
    pub iv: Option<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub private_key: Option<Vec<u8>>,
    pub enc_pk: Option<Vec<u8>>,
    pub enc_sk: Option<Vec<u8>>,
}

impl KeyCandidate {
    /// Candidate carrying only a seed
    pub fn from_iv(iv: impl Into<Vec<u8>>) -> Self {
        KeyCandidate {
            key_format_version: None,
            iv: Some(iv.into()),
            public_key: None,
            private_key: None,
            enc_pk: None,
            enc_sk: None,
        }
    }
}

impl fmt::Debug for KeyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCandidate")
            .field("key_format_version", &self.key_format_version)
            .field("iv", &self.iv.as_ref().map(|v| v.len()))
            .field("public_key", &self.public_key.as_ref().map(hex::encode))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("enc_pk", &self.enc_pk.as_ref().map(hex::encode))
            .field("enc_sk", &self.enc_sk.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for KeyCandidate {
    fn drop(&mut self) {
        for secret in [&mut self.iv, &mut self.private_key, &mut self.enc_sk] {
            secret.zeroize();
        }
    }
}
