//! Identity module
//!
//! Local identities and the passkeys bound to them.
//!
//! A local identity groups every passkey that recovers the same lock-key
//! seed. Its record is persisted through a [`StorageAdapter`] and guarded by
//! a per-passkey content hash.
//!
//! [`StorageAdapter`]: crate::core_storage::StorageAdapter

mod registry;
mod types;

pub use registry::{IdentityRegistry, IDENTITIES_RECORD_KEY};
pub use types::{LocalIdentity, PackedPublicKey, PasskeyEntry, PasskeyPublicKey, RecordCheck};
