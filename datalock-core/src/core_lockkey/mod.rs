//! Lock-key module
//!
//! Derivation, import and caching of lock-keys.
//!
//! - [`derive_lock_key`]: seed → full key material
//! - [`validate_external_key`]: accept an externally supplied key
//! - [`LockKeyCache`]: time-bounded in-memory cache with background purge
//! - [`Clock`]: injectable time source for the cache

mod cache;
mod clock;
mod derivation;
mod error;
mod key;

pub use cache::{LockKeyCache, DEFAULT_CACHE_LIFETIME};
pub use clock::{Clock, ManualClock, SystemClock};
pub use derivation::{
    derive_lock_key, encode_user_handle, seed_from_user_handle, seq_from_user_handle,
    validate_external_key, CURRENT_KEY_FORMAT_VERSION, USER_HANDLE_LEN,
};
pub use error::{LockKeyError, LockKeyResult};
pub use key::{KeyCandidate, LockKey};
