//! Lock-key lifecycle manager
//!
//! Resolves a local identity to its lock-key, running a passkey ceremony
//! only when the key is not cached:
//!
//! ```text
//!                      get_lock_key
//!                           |
//!        +------------------+-------------------+
//!        |                  |                   |
//!   cached key         reset_lock_key      not cached
//!   (+ optional        (register seq 1,         |
//!    extra passkey)     replace identity)  +----+------------+
//!                                          |                 |
//!                                   known identity     unknown identity
//!                                   (auth with its     (discoverable auth,
//!                                    credentials)       or register seq 1)
//! ```
//!
//! Ceremonies are single-flight: starting one abandons whichever is still
//! pending. A dismissed prompt resolves to `Ok(None)`.

mod options;

pub use options::{ConfigureOptions, GetLockKeyOptions, ResolvedLockKey};

use crate::config::{Config, RelyingPartyConfig};
use crate::core_cancel::{CancelReason, CancellationCoordinator, CeremonyGuard};
use crate::core_crypto::generate_entropy;
use crate::core_identity::{IdentityRegistry, LocalIdentity, PasskeyEntry};
use crate::core_lockkey::{
    derive_lock_key, encode_user_handle, seed_from_user_handle, validate_external_key, Clock,
    LockKey, LockKeyCache, LockKeyError, LockKeyResult,
};
use crate::core_storage::{open_storage, resolve_storage, StorageAdapter, StorageChoice, StorageType};
use crate::core_webauthn::{
    AuthOptions, AuthResponse, CeremonyError, Mediation, RegistrationOptions, UserEntity,
    WebAuthnClient,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Random bytes in a generated local identity (20 base64 characters)
const LOCAL_ID_ENTROPY_LEN: usize = 15;

/// Sequence number of the first passkey of an identity
const FIRST_SEQ: u16 = 1;

#[derive(Debug, Clone, Copy)]
enum Ceremony {
    Registration,
    Authentication,
}

/// Manages identities, their cached lock-keys and passkey ceremonies
pub struct LockKeyManager {
    registry: IdentityRegistry,
    cache: LockKeyCache,
    coordinator: CancellationCoordinator,
    client: Arc<dyn WebAuthnClient>,
    relying_party: RelyingPartyConfig,
    data_dir: PathBuf,
}

impl LockKeyManager {
    /// Create a manager over an explicit storage adapter with default settings
    pub fn new(storage: Arc<dyn StorageAdapter>, client: Arc<dyn WebAuthnClient>) -> Self {
        let defaults = Config::default();
        Self {
            registry: IdentityRegistry::new(storage),
            cache: LockKeyCache::new(),
            coordinator: CancellationCoordinator::new(),
            client,
            relying_party: defaults.relying_party,
            data_dir: defaults.storage.data_dir,
        }
    }

    /// Create a manager from configuration
    pub fn from_config(config: &Config, client: Arc<dyn WebAuthnClient>) -> LockKeyResult<Self> {
        let storage = open_storage(config.storage.storage_type, &config.storage.data_dir)?;
        let manager = Self::new(storage, client)
            .with_relying_party(config.relying_party.clone())
            .with_data_dir(config.storage.data_dir.clone());
        manager.cache.set_lifetime(config.cache.lifetime);

        info!(
            storage_type = %config.storage.storage_type,
            rp_id = %config.relying_party.id,
            cache_lifetime = ?config.cache.lifetime,
            "Lock-key manager configured"
        );
        Ok(manager)
    }

    /// Replace the cache clock, keeping the configured lifetime
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let lifetime = self.cache.lifetime();
        self.cache = LockKeyCache::with_clock(clock);
        self.cache.set_lifetime(lifetime);
        self
    }

    pub fn with_relying_party(mut self, relying_party: RelyingPartyConfig) -> Self {
        self.relying_party = relying_party;
        self
    }

    /// Root directory used when switching to a persistent storage type
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Resolve the lock-key for a local identity
    ///
    /// Returns `Ok(None)` when the user dismisses the passkey prompt.
    pub async fn get_lock_key(
        &self,
        options: GetLockKeyOptions,
    ) -> LockKeyResult<Option<ResolvedLockKey>> {
        let local_id = options
            .local_identity
            .clone()
            .unwrap_or_else(generate_local_id);

        match self.registry.get(&local_id).await? {
            Some(identity) => match self.cache.get(&local_id) {
                Some(key) if !options.reset_lock_key => {
                    if options.add_new_passkey {
                        self.add_passkey(&local_id, &identity, &key, &options).await?;
                    }
                    debug!(local_id = %local_id, "Lock-key served from cache");
                    Ok(Some(ResolvedLockKey::new(key, local_id)))
                }
                _ => {
                    self.cache.clear(Some(&local_id));
                    if options.reset_lock_key {
                        self.reset_identity(local_id, &options).await
                    } else if !options.add_new_passkey {
                        self.authenticate_identity(local_id, &identity, &options).await
                    } else {
                        Err(LockKeyError::NoCachedKey)
                    }
                }
            },
            None if options.add_new_passkey => self.register_identity(local_id, &options).await,
            None => self.authenticate_discoverable(local_id, &options).await,
        }
    }

    /// Local identities in the registry, sorted
    pub async fn list_local_identities(&self) -> LockKeyResult<Vec<String>> {
        Ok(self.registry.list().await?)
    }

    /// Lock-key currently cached for `local_id`
    pub fn cached_lock_key(&self, local_id: &str) -> Option<Arc<LockKey>> {
        self.cache.get(local_id)
    }

    /// Drop one cached lock-key, or all of them
    pub fn clear_lock_key_cache(&self, local_id: Option<&str>) {
        self.cache.clear(local_id);
    }

    /// Forget an identity and its cached lock-key
    ///
    /// Passkeys stay on the authenticator; they just stop matching.
    pub async fn remove_local_account(&self, local_id: &str) -> LockKeyResult<bool> {
        self.cache.clear(Some(local_id));
        let removed = self.registry.remove(local_id).await?;
        if removed {
            info!(local_id = %local_id, "Removed local account");
        }
        Ok(removed)
    }

    /// Set the maximum time a lock-key stays cached
    pub fn set_max_lock_key_cache_lifetime(&self, lifetime: Duration) {
        self.cache.set_lifetime(lifetime);
    }

    /// Millisecond form; negative or non-numeric values disable caching
    pub fn set_max_lock_key_cache_lifetime_ms(&self, ms: f64) -> Duration {
        self.cache.set_lifetime_ms(ms)
    }

    pub fn cache_lifetime(&self) -> Duration {
        self.cache.lifetime()
    }

    /// Apply runtime configuration
    pub async fn configure(&self, options: ConfigureOptions) -> LockKeyResult<()> {
        if let Some(choice) = options.account_storage {
            self.configure_storage(choice).await?;
        }
        if let Some(lifetime) = options.cache_lifetime {
            self.cache.set_lifetime(lifetime);
        }
        Ok(())
    }

    /// Switch the storage the identity registry lives in
    ///
    /// The registry reloads lazily from the new storage.
    pub async fn configure_storage(&self, choice: impl Into<StorageChoice>) -> LockKeyResult<()> {
        let adapter = resolve_storage(choice.into(), &self.data_dir)?;
        let storage_type = adapter.storage_type();
        self.registry.reconfigure(adapter).await;
        info!(storage_type = %storage_type, "Identity storage reconfigured");
        Ok(())
    }

    pub async fn storage_type(&self) -> StorageType {
        self.registry.storage_type().await
    }

    /// Cancel whichever ceremony is pending
    pub fn cancel_pending(&self, reason: CancelReason) -> bool {
        self.coordinator.cancel_current(reason)
    }

    pub fn has_pending_ceremony(&self) -> bool {
        self.coordinator.is_pending()
    }

    /// Register an extra passkey for an identity whose key is cached
    async fn add_passkey(
        &self,
        local_id: &str,
        identity: &LocalIdentity,
        key: &LockKey,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<()> {
        let seq = identity
            .next_seq()
            .ok_or_else(|| LockKeyError::SequenceExhausted {
                local_id: local_id.to_string(),
            })?;

        if let Some(entry) = self.register_passkey(key, seq, options).await? {
            self.registry.append_passkey(local_id, entry).await?;
            info!(local_id = %local_id, seq, "Added passkey to local identity");
        }
        Ok(())
    }

    /// Replace an identity's key and passkeys
    ///
    /// A dismissed registration leaves the stored identity untouched.
    async fn reset_identity(
        &self,
        local_id: String,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<ResolvedLockKey>> {
        let key = Arc::new(registration_key(options)?);
        let Some(entry) = self.register_passkey(&key, FIRST_SEQ, options).await? else {
            return Ok(None);
        };

        self.registry
            .insert(&local_id, LocalIdentity::with_first_passkey(entry))
            .await?;
        self.cache.put(&local_id, Arc::clone(&key), true);
        info!(local_id = %local_id, "Reset lock-key for local identity");

        Ok(Some(ResolvedLockKey::new(key, local_id)))
    }

    /// Create an identity with its first passkey
    async fn register_identity(
        &self,
        local_id: String,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<ResolvedLockKey>> {
        let key = Arc::new(registration_key(options)?);
        let Some(entry) = self.register_passkey(&key, FIRST_SEQ, options).await? else {
            return Ok(None);
        };

        self.registry
            .insert(&local_id, LocalIdentity::with_first_passkey(entry))
            .await?;
        self.cache.put(&local_id, Arc::clone(&key), false);
        info!(local_id = %local_id, "Registered new local identity");

        Ok(Some(ResolvedLockKey::new(key, local_id)))
    }

    /// Authenticate with one of a known identity's passkeys
    async fn authenticate_identity(
        &self,
        local_id: String,
        identity: &LocalIdentity,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<ResolvedLockKey>> {
        let Some(response) = self.authenticate(identity.credential_ids(), options).await? else {
            return Ok(None);
        };

        let key = Arc::new(extract_lock_key(&response)?);
        if options.verify {
            self.verify_response(identity, &response).await?;
        }
        self.cache.put(&local_id, Arc::clone(&key), false);
        info!(local_id = %local_id, "Unlocked local identity with passkey");

        Ok(Some(ResolvedLockKey::new(key, local_id)))
    }

    /// Authenticate with any discoverable passkey and match it to an identity
    async fn authenticate_discoverable(
        &self,
        local_id: String,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<ResolvedLockKey>> {
        let Some(response) = self.authenticate(Vec::new(), options).await? else {
            return Ok(None);
        };

        let key = Arc::new(extract_lock_key(&response)?);
        match self.registry.find_by_credential(&response.credential_id).await? {
            Some((matched_id, identity)) => {
                if options.verify {
                    self.verify_response(&identity, &response).await?;
                }
                self.cache.put(&matched_id, Arc::clone(&key), false);
                info!(local_id = %matched_id, "Unlocked local identity with discovered passkey");
                Ok(Some(ResolvedLockKey::new(key, matched_id)))
            }
            None if options.verify => {
                warn!(
                    credential_id = %response.credential_id,
                    "Passkey matches no local identity"
                );
                Err(LockKeyError::UnrecognizedPasskey)
            }
            None => {
                debug!(local_id = %local_id, "Unverified passkey matched no local identity");
                Ok(Some(ResolvedLockKey::new(key, local_id)))
            }
        }
    }

    async fn register_passkey(
        &self,
        key: &LockKey,
        seq: u16,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<PasskeyEntry>> {
        let guard = self.coordinator.begin(options.signal.as_ref());
        let request = RegistrationOptions {
            relying_party_id: self.relying_party_id(options),
            relying_party_name: options
                .relying_party_name
                .clone()
                .unwrap_or_else(|| self.relying_party.name.clone()),
            user: UserEntity {
                id: encode_user_handle(key, seq),
                name: options
                    .username
                    .clone()
                    .unwrap_or_else(|| self.relying_party.default_username.clone()),
                display_name: options
                    .display_name
                    .clone()
                    .unwrap_or_else(|| self.relying_party.default_display_name.clone()),
            },
            signal: Some(guard.signal().clone()),
        };

        let result = run_ceremony(
            &guard,
            Ceremony::Registration,
            self.client.register(request),
        )
        .await?;
        self.coordinator.end(guard);

        match result {
            Some(registration) => Ok(Some(PasskeyEntry::new(
                seq,
                registration.credential_id,
                registration.public_key,
            )?)),
            None => {
                debug!(seq, "Passkey registration dismissed");
                Ok(None)
            }
        }
    }

    async fn authenticate(
        &self,
        allow_credentials: Vec<String>,
        options: &GetLockKeyOptions,
    ) -> LockKeyResult<Option<AuthResponse>> {
        let guard = self.coordinator.begin(options.signal.as_ref());
        let request = AuthOptions {
            relying_party_id: self.relying_party_id(options),
            mediation: Mediation::Optional,
            allow_credentials,
            signal: Some(guard.signal().clone()),
        };

        let result = run_ceremony(&guard, Ceremony::Authentication, self.client.auth(request)).await?;
        self.coordinator.end(guard);

        if result.is_none() {
            debug!("Passkey authentication dismissed");
        }
        Ok(result.map(|auth| auth.response))
    }

    async fn verify_response(
        &self,
        identity: &LocalIdentity,
        response: &AuthResponse,
    ) -> LockKeyResult<()> {
        let passkey = identity
            .find_passkey(&response.credential_id)
            .ok_or(LockKeyError::VerificationFailed)?;

        match self
            .client
            .verify_auth_response(response, &passkey.public_key)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(credential_id = %response.credential_id, "Assertion signature rejected");
                Err(LockKeyError::VerificationFailed)
            }
            Err(e) => Err(LockKeyError::Authentication(e)),
        }
    }

    fn relying_party_id(&self, options: &GetLockKeyOptions) -> String {
        options
            .relying_party_id
            .clone()
            .unwrap_or_else(|| self.relying_party.id.clone())
    }
}

impl std::fmt::Debug for LockKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockKeyManager")
            .field("relying_party", &self.relying_party.id)
            .field("cached_keys", &self.cache.len())
            .field("pending_ceremony", &self.coordinator.is_pending())
            .finish()
    }
}

/// Race a ceremony against cancellation of its token
async fn run_ceremony<T, F>(guard: &CeremonyGuard, kind: Ceremony, ceremony: F) -> LockKeyResult<T>
where
    F: Future<Output = Result<T, CeremonyError>>,
{
    tokio::select! {
        biased;
        reason = guard.cancelled() => {
            debug!(ceremony = ?kind, reason = %reason, "Ceremony cancelled");
            Err(LockKeyError::Cancelled(reason))
        }
        result = ceremony => match result {
            Ok(value) => Ok(value),
            Err(CeremonyError::Cancelled(reason)) => Err(LockKeyError::Cancelled(reason)),
            Err(e) => {
                warn!(ceremony = ?kind, error = %e, "Ceremony failed");
                Err(match kind {
                    Ceremony::Registration => LockKeyError::Registration(e),
                    Ceremony::Authentication => LockKeyError::Authentication(e),
                })
            }
        },
    }
}

fn registration_key(options: &GetLockKeyOptions) -> LockKeyResult<LockKey> {
    match &options.use_lock_key {
        Some(candidate) => validate_external_key(candidate),
        None => derive_lock_key(None),
    }
}

fn extract_lock_key(response: &AuthResponse) -> LockKeyResult<LockKey> {
    let seed = seed_from_user_handle(&response.user_id).ok_or(LockKeyError::MissingKeyMaterial)?;
    derive_lock_key(Some(seed)).map_err(|_| LockKeyError::MissingKeyMaterial)
}

fn generate_local_id() -> String {
    STANDARD.encode(generate_entropy(LOCAL_ID_ENTROPY_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_lockkey::{seq_from_user_handle, ManualClock};
    use crate::core_storage::MemoryStore;
    use crate::core_webauthn::SoftwareAuthenticator;

    fn manager() -> (LockKeyManager, SoftwareAuthenticator, ManualClock) {
        let authenticator = SoftwareAuthenticator::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let manager = LockKeyManager::new(Arc::new(MemoryStore::new()), Arc::new(authenticator.clone()))
            .with_clock(Arc::new(clock.clone()));
        (manager, authenticator, clock)
    }

    #[test]
    fn test_generated_local_id_shape() {
        let id = generate_local_id();
        assert_eq!(id.len(), 20);
        assert_ne!(id, generate_local_id());
    }

    #[test]
    fn test_extract_requires_full_user_handle() {
        let key = derive_lock_key(None).unwrap();
        let mut response = AuthResponse {
            credential_id: "c".to_string(),
            user_id: encode_user_handle(&key, 3),
            signature: vec![],
            authenticator_data: vec![],
            client_data_json: vec![],
        };
        assert_eq!(extract_lock_key(&response).unwrap(), key);

        response.user_id.truncate(32);
        assert!(matches!(
            extract_lock_key(&response),
            Err(LockKeyError::MissingKeyMaterial)
        ));
    }

    #[tokio::test]
    async fn test_register_then_cached() {
        let (manager, authenticator, _clock) = manager();

        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(authenticator.registration_count(), 1);

        let again = manager
            .get_lock_key(GetLockKeyOptions::new().local_identity(first.local_identity()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*again, *first);
        assert_eq!(authenticator.assertion_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_authenticates() {
        let (manager, authenticator, clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::from_secs(31 * 60));
        let again = manager
            .get_lock_key(GetLockKeyOptions::new().local_identity(first.local_identity()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*again, *first);
        assert_eq!(authenticator.assertion_count(), 1);
    }

    #[tokio::test]
    async fn test_add_passkey_uses_next_seq() {
        let (manager, authenticator, _clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        let local_id = first.local_identity().to_string();

        manager
            .get_lock_key(
                GetLockKeyOptions::new()
                    .local_identity(&local_id)
                    .add_new_passkey(true),
            )
            .await
            .unwrap()
            .unwrap();

        let identity = manager.registry.get(&local_id).await.unwrap().unwrap();
        assert_eq!(identity.last_seq, 2);
        assert_eq!(identity.passkeys.len(), 2);

        // Answer with the second passkey; its user handle carries seq 2
        let ids = authenticator.credential_ids("localhost");
        authenticator.select_credential(&ids[1]);
        manager.clear_lock_key_cache(None);
        let response = manager
            .authenticate(identity.credential_ids(), &GetLockKeyOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seq_from_user_handle(&response.user_id), Some(2));
        assert_eq!(extract_lock_key(&response).unwrap(), *first);
    }

    #[tokio::test]
    async fn test_add_passkey_without_cache_fails() {
        let (manager, _authenticator, _clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        manager.clear_lock_key_cache(None);

        let err = manager
            .get_lock_key(
                GetLockKeyOptions::new()
                    .local_identity(first.local_identity())
                    .add_new_passkey(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockKeyError::NoCachedKey));
    }

    #[tokio::test]
    async fn test_sequence_exhausted() {
        let (manager, _authenticator, _clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        let local_id = first.local_identity().to_string();

        let mut identity = manager.registry.get(&local_id).await.unwrap().unwrap();
        identity.last_seq = u16::MAX;
        manager.registry.insert(&local_id, identity).await.unwrap();

        let err = manager
            .get_lock_key(
                GetLockKeyOptions::new()
                    .local_identity(&local_id)
                    .add_new_passkey(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockKeyError::SequenceExhausted { .. }));
    }

    #[tokio::test]
    async fn test_dismissed_registration_returns_none() {
        let (manager, authenticator, _clock) = manager();
        authenticator.dismiss_next();

        let result = manager
            .get_lock_key(GetLockKeyOptions::new().local_identity("x").add_new_passkey(true))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(manager.list_local_identities().await.unwrap().is_empty());
        assert!(!manager.has_pending_ceremony());
    }

    #[tokio::test]
    async fn test_tampered_assertion_not_cached() {
        let (manager, authenticator, _clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        let local_id = first.local_identity().to_string();
        manager.clear_lock_key_cache(None);

        authenticator.tamper_next_signature();
        let err = manager
            .get_lock_key(GetLockKeyOptions::new().local_identity(&local_id))
            .await
            .unwrap_err();
        assert!(matches!(err, LockKeyError::VerificationFailed));
        assert!(manager.cached_lock_key(&local_id).is_none());

        // Without verification the key is still extracted
        authenticator.tamper_next_signature();
        let unverified = manager
            .get_lock_key(GetLockKeyOptions::new().local_identity(&local_id).verify(false))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*unverified, *first);
    }

    #[tokio::test]
    async fn test_remove_local_account() {
        let (manager, _authenticator, _clock) = manager();
        let first = manager
            .get_lock_key(GetLockKeyOptions::new().add_new_passkey(true))
            .await
            .unwrap()
            .unwrap();
        let local_id = first.local_identity().to_string();

        assert!(manager.remove_local_account(&local_id).await.unwrap());
        assert!(manager.cached_lock_key(&local_id).is_none());
        assert!(manager.list_local_identities().await.unwrap().is_empty());
        assert!(!manager.remove_local_account(&local_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_configure() {
        let (manager, _authenticator, _clock) = manager();
        manager
            .configure(ConfigureOptions {
                account_storage: Some(StorageChoice::Type(StorageType::SessionStorage)),
                cache_lifetime: Some(Duration::from_secs(60)),
            })
            .await
            .unwrap();

        assert_eq!(manager.storage_type().await, StorageType::SessionStorage);
        assert_eq!(manager.cache_lifetime(), Duration::from_secs(60));
        assert_eq!(
            manager.set_max_lock_key_cache_lifetime_ms(f64::NAN),
            Duration::ZERO
        );
    }
}
