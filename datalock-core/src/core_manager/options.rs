//! Request and result types for the lock-key manager

use crate::core_cancel::CancelSignal;
use crate::core_lockkey::{KeyCandidate, LockKey};
use crate::core_storage::StorageChoice;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Options for [`LockKeyManager::get_lock_key`]
///
/// Unset names and relying-party fields fall back to the manager's
/// configured defaults.
///
/// [`LockKeyManager::get_lock_key`]: super::LockKeyManager::get_lock_key
#[derive(Debug, Clone)]
pub struct GetLockKeyOptions {
    /// Local identity to resolve; a random one is generated when unset
    pub local_identity: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub relying_party_id: Option<String>,
    pub relying_party_name: Option<String>,
    /// Register a passkey (for a new identity, or an extra one for a cached
    /// identity)
    pub add_new_passkey: bool,
    /// Replace the identity's key and passkeys with a fresh registration
    pub reset_lock_key: bool,
    /// Key to register instead of a freshly derived one
    pub use_lock_key: Option<KeyCandidate>,
    /// Check the assertion signature against the stored public key
    pub verify: bool,
    /// Caller-side cancellation
    pub signal: Option<CancelSignal>,
}

impl Default for GetLockKeyOptions {
    fn default() -> Self {
        GetLockKeyOptions {
            local_identity: None,
            username: None,
            display_name: None,
            relying_party_id: None,
            relying_party_name: None,
            add_new_passkey: false,
            reset_lock_key: false,
            use_lock_key: None,
            verify: true,
            signal: None,
        }
    }
}

impl GetLockKeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_identity(mut self, local_id: impl Into<String>) -> Self {
        self.local_identity = Some(local_id.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn relying_party_id(mut self, id: impl Into<String>) -> Self {
        self.relying_party_id = Some(id.into());
        self
    }

    pub fn relying_party_name(mut self, name: impl Into<String>) -> Self {
        self.relying_party_name = Some(name.into());
        self
    }

    pub fn add_new_passkey(mut self, enabled: bool) -> Self {
        self.add_new_passkey = enabled;
        self
    }

    pub fn reset_lock_key(mut self, enabled: bool) -> Self {
        self.reset_lock_key = enabled;
        self
    }

    pub fn use_lock_key(mut self, candidate: KeyCandidate) -> Self {
        self.use_lock_key = Some(candidate);
        self
    }

    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    pub fn signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// A lock-key together with the local identity it belongs to
///
/// Dereferences to the [`LockKey`].
#[derive(Debug, Clone)]
pub struct ResolvedLockKey {
    key: Arc<LockKey>,
    local_identity: String,
}

impl ResolvedLockKey {
    pub(crate) fn new(key: Arc<LockKey>, local_identity: String) -> Self {
        ResolvedLockKey {
            key,
            local_identity,
        }
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn key(&self) -> &Arc<LockKey> {
        &self.key
    }

    pub fn into_parts(self) -> (Arc<LockKey>, String) {
        (self.key, self.local_identity)
    }
}

impl Deref for ResolvedLockKey {
    type Target = LockKey;

    fn deref(&self) -> &LockKey {
        &self.key
    }
}

impl AsRef<LockKey> for ResolvedLockKey {
    fn as_ref(&self) -> &LockKey {
        &self.key
    }
}

/// Runtime reconfiguration for [`LockKeyManager::configure`]
///
/// [`LockKeyManager::configure`]: super::LockKeyManager::configure
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    pub account_storage: Option<StorageChoice>,
    pub cache_lifetime: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GetLockKeyOptions::default();
        assert!(options.verify);
        assert!(!options.add_new_passkey);
        assert!(!options.reset_lock_key);
        assert!(options.local_identity.is_none());
    }

    #[test]
    fn test_builder() {
        let options = GetLockKeyOptions::new()
            .local_identity("abc")
            .username("alice")
            .add_new_passkey(true)
            .verify(false);
        assert_eq!(options.local_identity.as_deref(), Some("abc"));
        assert_eq!(options.username.as_deref(), Some("alice"));
        assert!(options.add_new_passkey);
        assert!(!options.verify);
    }
}
