//! Identity record types
//!
//! In-memory forms of local identities and their passkeys, plus the packed
//! JSON forms they are persisted (and hashed) as.

use crate::core_crypto::content_hash;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public key of a registered passkey, as returned by the ceremony layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyPublicKey {
    /// COSE algorithm identifier (e.g. -8 for EdDSA, -7 for ES256)
    pub algo_cose: i64,
    /// Raw public key bytes
    pub raw: Vec<u8>,
    /// DER SubjectPublicKeyInfo encoding
    pub spki: Vec<u8>,
}

impl PasskeyPublicKey {
    /// Serializable form
    pub fn pack(&self) -> PackedPublicKey {
        PackedPublicKey {
            algo_cose: self.algo_cose,
            raw: STANDARD.encode(&self.raw),
            spki: STANDARD.encode(&self.spki),
        }
    }
}

/// Packed (JSON) form of [`PasskeyPublicKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedPublicKey {
    #[serde(rename = "algoCOSE")]
    pub algo_cose: i64,
    pub raw: String,
    pub spki: String,
}

impl PackedPublicKey {
    /// Decode back to the usable form; both key fields must be non-empty base64
    pub fn unpack(&self) -> Result<PasskeyPublicKey, String> {
        if self.raw.is_empty() || self.spki.is_empty() {
            return Err("publicKey has an empty key field".to_string());
        }
        let raw = STANDARD
            .decode(&self.raw)
            .map_err(|e| format!("publicKey.raw is not base64: {}", e))?;
        let spki = STANDARD
            .decode(&self.spki)
            .map_err(|e| format!("publicKey.spki is not base64: {}", e))?;
        Ok(PasskeyPublicKey {
            algo_cose: self.algo_cose,
            raw,
            spki,
        })
    }
}

/// One passkey registered to a local identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyEntry {
    pub seq: u16,
    pub credential_id: String,
    pub public_key: PasskeyPublicKey,
    /// Integrity hash over every other field
    pub hash: String,
}

/// Hashed fields, in canonical order
#[derive(Serialize)]
struct HashInput<'a> {
    seq: u16,
    #[serde(rename = "credentialID")]
    credential_id: &'a str,
    #[serde(rename = "publicKey")]
    public_key: PackedPublicKey,
}

impl PasskeyEntry {
    /// Build an entry and compute its integrity hash
    pub fn new(
        seq: u16,
        credential_id: impl Into<String>,
        public_key: PasskeyPublicKey,
    ) -> Result<Self, serde_json::Error> {
        let credential_id = credential_id.into();
        let hash = Self::compute_hash(seq, &credential_id, &public_key)?;
        Ok(PasskeyEntry {
            seq,
            credential_id,
            public_key,
            hash,
        })
    }

    /// Base64 SHA-512 of `{"seq":..,"credentialID":..,"publicKey":{packed}}`
    pub fn compute_hash(
        seq: u16,
        credential_id: &str,
        public_key: &PasskeyPublicKey,
    ) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(&HashInput {
            seq,
            credential_id,
            public_key: public_key.pack(),
        })?;
        Ok(content_hash(&canonical))
    }

    /// Whether the stored hash matches the entry's contents
    pub fn hash_matches(&self) -> bool {
        match Self::compute_hash(self.seq, &self.credential_id, &self.public_key) {
            Ok(expected) => expected == self.hash,
            Err(_) => false,
        }
    }

    fn to_stored(&self) -> StoredPasskey {
        StoredPasskey {
            seq: self.seq,
            credential_id: self.credential_id.clone(),
            public_key: self.public_key.pack(),
            hash: self.hash.clone(),
        }
    }
}

/// A local identity: one lock-key seed shared by one or more passkeys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub last_seq: u16,
    pub passkeys: Vec<PasskeyEntry>,
}

impl LocalIdentity {
    /// Identity holding a single, first passkey
    pub fn with_first_passkey(entry: PasskeyEntry) -> Self {
        LocalIdentity {
            last_seq: entry.seq,
            passkeys: vec![entry],
        }
    }

    /// Sequence number for the next passkey, `None` once exhausted
    pub fn next_seq(&self) -> Option<u16> {
        self.last_seq.checked_add(1)
    }

    /// Credential IDs of every registered passkey, in registration order
    pub fn credential_ids(&self) -> Vec<String> {
        self.passkeys
            .iter()
            .map(|p| p.credential_id.clone())
            .collect()
    }

    /// Passkey registered under `credential_id` (case-sensitive match)
    pub fn find_passkey(&self, credential_id: &str) -> Option<&PasskeyEntry> {
        self.passkeys
            .iter()
            .find(|p| p.credential_id == credential_id)
    }

    /// Serializable form
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(StoredIdentity {
            last_seq: self.last_seq,
            passkeys: self.passkeys.iter().map(PasskeyEntry::to_stored).collect(),
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    last_seq: u16,
    passkeys: Vec<StoredPasskey>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPasskey {
    seq: u16,
    #[serde(rename = "credentialID")]
    credential_id: String,
    public_key: PackedPublicKey,
    hash: String,
}

/// Outcome of validating one persisted identity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordCheck {
    Valid(LocalIdentity),
    Rejected { local_id: String, reason: String },
}

impl RecordCheck {
    /// Validate a persisted record
    ///
    /// Any malformed passkey rejects the whole identity; nothing is repaired.
    pub fn check(local_id: &str, value: &Value) -> RecordCheck {
        match Self::parse(value) {
            Ok(identity) => RecordCheck::Valid(identity),
            Err(reason) => RecordCheck::Rejected {
                local_id: local_id.to_string(),
                reason,
            },
        }
    }

    fn parse(value: &Value) -> Result<LocalIdentity, String> {
        let stored: StoredIdentity =
            StoredIdentity::deserialize(value).map_err(|e| format!("malformed record: {}", e))?;

        if stored.passkeys.is_empty() {
            return Err("no passkeys".to_string());
        }

        let mut passkeys = Vec::with_capacity(stored.passkeys.len());
        for stored_passkey in stored.passkeys {
            if stored_passkey.credential_id.is_empty() {
                return Err("passkey with empty credentialID".to_string());
            }
            if stored_passkey.seq > stored.last_seq {
                return Err(format!(
                    "passkey {} has seq {} beyond lastSeq {}",
                    stored_passkey.credential_id, stored_passkey.seq, stored.last_seq
                ));
            }
            if stored_passkey.hash.is_empty() {
                return Err(format!(
                    "passkey {} has an empty hash",
                    stored_passkey.credential_id
                ));
            }

            let entry = PasskeyEntry {
                seq: stored_passkey.seq,
                public_key: stored_passkey.public_key.unpack()?,
                credential_id: stored_passkey.credential_id,
                hash: stored_passkey.hash,
            };
            if !entry.hash_matches() {
                return Err(format!("passkey {} failed integrity check", entry.credential_id));
            }
            passkeys.push(entry);
        }

        Ok(LocalIdentity {
            last_seq: stored.last_seq,
            passkeys,
        })
    }
}
