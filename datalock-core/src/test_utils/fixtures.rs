//! Test fixtures for creating common test objects
//!
//! A manager wired to an in-process authenticator, in-memory storage and a
//! manual clock, plus a builder for variations.

use crate::config::RelyingPartyConfig;
use crate::core_lockkey::ManualClock;
use crate::core_manager::{GetLockKeyOptions, LockKeyManager, ResolvedLockKey};
use crate::core_storage::{MemoryStore, StorageAdapter, StorageType};
use crate::core_webauthn::SoftwareAuthenticator;
use std::sync::Arc;

/// Wall-clock start of the manual clock (2023-11-14T22:13:20Z)
pub const TEST_CLOCK_START_MS: u64 = 1_700_000_000_000;

/// Relying party ID used by fixtures
pub const TEST_RP_ID: &str = "datalock.test";

/// A manager and the collaborators a test drives directly
pub struct TestHarness {
    pub manager: Arc<LockKeyManager>,
    pub authenticator: SoftwareAuthenticator,
    pub clock: ManualClock,
    pub storage: Arc<dyn StorageAdapter>,
}

impl TestHarness {
    pub fn new() -> Self {
        TestHarnessBuilder::new().build()
    }

    /// Register a new identity and return its key
    pub async fn register(&self, local_id: &str) -> ResolvedLockKey {
        let options = GetLockKeyOptions::new()
            .local_identity(local_id)
            .add_new_passkey(true);
        match self.manager.get_lock_key(options).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => panic!("Registration for {} was dismissed", local_id),
            Err(e) => panic!("Registration for {} failed: {}", local_id, e),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestHarness`]
pub struct TestHarnessBuilder {
    storage: Option<Arc<dyn StorageAdapter>>,
    authenticator: Option<SoftwareAuthenticator>,
    start_ms: u64,
}

impl TestHarnessBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            authenticator: None,
            start_ms: TEST_CLOCK_START_MS,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Share credentials with another harness
    pub fn with_authenticator(mut self, authenticator: SoftwareAuthenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_start_ms(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn build(self) -> TestHarness {
        let storage = self
            .storage
            .unwrap_or_else(|| -> Arc<dyn StorageAdapter> {
                Arc::new(MemoryStore::with_type(StorageType::Idb))
            });
        let authenticator = self.authenticator.unwrap_or_default();
        let clock = ManualClock::new(self.start_ms);

        let manager = LockKeyManager::new(Arc::clone(&storage), Arc::new(authenticator.clone()))
            .with_relying_party(test_relying_party())
            .with_clock(Arc::new(clock.clone()));

        TestHarness {
            manager: Arc::new(manager),
            authenticator,
            clock,
            storage,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Relying party settings used by fixtures
pub fn test_relying_party() -> RelyingPartyConfig {
    RelyingPartyConfig {
        id: TEST_RP_ID.to_string(),
        name: "Datalock Test".to_string(),
        ..RelyingPartyConfig::default()
    }
}
