//! Error types for the lock-key lifecycle

use crate::core_cancel::CancelReason;
use crate::core_crypto::CryptoError;
use crate::core_storage::StorageError;
use crate::core_webauthn::CeremonyError;
use thiserror::Error;

/// Result type for lock-key operations
pub type LockKeyResult<T> = Result<T, LockKeyError>;

/// Errors that can occur while deriving, caching or resolving lock-keys
#[derive(Error, Debug)]
pub enum LockKeyError {
    /// Seed-to-key derivation failed
    #[error("Encryption/decryption key derivation failed")]
    Derivation(#[source] CryptoError),

    /// Imported key is neither a current-format key nor carries a usable seed
    #[error("Unrecognized lock-key")]
    UnrecognizedKey,

    /// Registration ceremony failed
    #[error("Identity/Passkey registration failed")]
    Registration(#[source] CeremonyError),

    /// Authentication ceremony failed
    #[error("Passkey authentication failed")]
    Authentication(#[source] CeremonyError),

    /// Ceremony was cancelled before it settled
    #[error("Passkey operation cancelled: {0}")]
    Cancelled(CancelReason),

    /// Assertion signature did not verify against the stored public key
    #[error("Auth verification failed")]
    VerificationFailed,

    /// Verification was requested but the passkey matches no local identity
    #[error("Auth verification requested but skipped, against unrecognized passkey (no matching local-identity)")]
    UnrecognizedPasskey,

    /// Authenticated passkey's user handle does not carry a seed
    #[error("Chosen passkey did not provide a valid encryption/decryption key")]
    MissingKeyMaterial,

    /// Adding a passkey needs the identity's key to be cached
    #[error("Encryption/Decryption key not currently cached, unavailable for new passkey")]
    NoCachedKey,

    /// The identity already holds the maximum number of passkeys
    #[error("Passkey sequence exhausted for local identity {local_id}")]
    SequenceExhausted { local_id: String },

    /// Identity registry storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<serde_json::Error> for LockKeyError {
    fn from(e: serde_json::Error) -> Self {
        LockKeyError::Storage(StorageError::Serialization(e))
    }
}
