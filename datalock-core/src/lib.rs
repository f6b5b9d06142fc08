//! Datalock core
//!
//! Passkey-protected lock-keys for local data: each local identity owns a
//! key derived from a random seed that lives only in its passkeys' user
//! handles. The [`LockKeyManager`] registers and authenticates passkeys,
//! recovers and caches keys, and [`core_data`] seals and signs data with
//! them.

pub mod config;
pub mod core_cancel;
pub mod core_crypto;
pub mod core_data;
pub mod core_identity;
pub mod core_lockkey;
pub mod core_manager;
pub mod core_storage;
pub mod core_webauthn;
pub mod logging;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

pub use config::Config;
pub use core_cancel::{CancelController, CancelReason, CancelSignal};
pub use core_crypto::generate_entropy;
pub use core_data::{
    lock_data, sign_data, unlock_data, verify_data, DataError, OutputFormat, UnlockFormat,
    UnlockOptions,
};
pub use core_lockkey::{derive_lock_key, KeyCandidate, LockKey, LockKeyError, LockKeyResult};
pub use core_manager::{ConfigureOptions, GetLockKeyOptions, LockKeyManager, ResolvedLockKey};
pub use core_storage::{StorageChoice, StorageType};
pub use logging::{init_logging, LogLevel};
