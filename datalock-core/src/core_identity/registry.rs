//! Identity registry
//!
//! Loads, validates and persists the map of local identities. The whole map
//! lives in a single storage record and is loaded lazily on first access,
//! then kept in memory until the storage backend changes.

use super::types::{LocalIdentity, PasskeyEntry, RecordCheck};
use crate::core_storage::{StorageAdapter, StorageError, StorageType};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Storage key of the persisted identity map
pub const IDENTITIES_RECORD_KEY: &str = "local-identities";

type IdentityMap = BTreeMap<String, LocalIdentity>;

struct RegistryState {
    store: Arc<dyn StorageAdapter>,
    identities: Option<IdentityMap>,
}

impl RegistryState {
    async fn loaded(&mut self) -> Result<&mut IdentityMap, StorageError> {
        if self.identities.is_none() {
            let loaded = load_identities(self.store.as_ref()).await?;
            debug!(
                storage = %self.store.storage_type(),
                count = loaded.len(),
                "Loaded local identities"
            );
            self.identities = Some(loaded);
        }
        match self.identities.as_mut() {
            Some(identities) => Ok(identities),
            None => Err(StorageError::Backend("Identity registry not loaded".to_string())),
        }
    }

    async fn persist(&mut self) -> Result<(), StorageError> {
        let store = Arc::clone(&self.store);
        let identities = self.loaded().await?;

        if identities.is_empty() {
            store.remove(IDENTITIES_RECORD_KEY).await?;
            return Ok(());
        }

        let mut record = Map::new();
        for (local_id, identity) in identities.iter() {
            record.insert(local_id.clone(), identity.to_value()?);
        }
        store.set(IDENTITIES_RECORD_KEY, Value::Object(record)).await
    }
}

async fn load_identities(store: &dyn StorageAdapter) -> Result<IdentityMap, StorageError> {
    let mut identities = IdentityMap::new();

    let record = match store.get(IDENTITIES_RECORD_KEY).await? {
        Some(Value::Object(record)) => record,
        Some(_) => {
            warn!("Ignoring local identity record that is not a JSON object");
            return Ok(identities);
        }
        None => return Ok(identities),
    };

    for (local_id, entry) in record.iter() {
        match RecordCheck::check(local_id, entry) {
            RecordCheck::Valid(identity) => {
                identities.insert(local_id.clone(), identity);
            }
            RecordCheck::Rejected { local_id, reason } => {
                warn!(local_id = %local_id, reason = %reason, "Dropping invalid local identity");
            }
        }
    }

    Ok(identities)
}

/// Registry of local identities backed by a [`StorageAdapter`]
pub struct IdentityRegistry {
    state: Mutex<RegistryState>,
}

impl IdentityRegistry {
    /// Create a registry over `store`; nothing is read until first use
    pub fn new(store: Arc<dyn StorageAdapter>) -> Self {
        IdentityRegistry {
            state: Mutex::new(RegistryState {
                store,
                identities: None,
            }),
        }
    }

    /// Snapshot of every valid identity
    pub async fn load(&self) -> Result<BTreeMap<String, LocalIdentity>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state.loaded().await?.clone())
    }

    /// Identity registered under `local_id`
    pub async fn get(&self, local_id: &str) -> Result<Option<LocalIdentity>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state.loaded().await?.get(local_id).cloned())
    }

    /// Known local IDs, sorted
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state.loaded().await?.keys().cloned().collect())
    }

    /// First identity (in sorted local-ID order) holding `credential_id`
    pub async fn find_by_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<(String, LocalIdentity)>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state
            .loaded()
            .await?
            .iter()
            .find(|(_, identity)| identity.find_passkey(credential_id).is_some())
            .map(|(local_id, identity)| (local_id.clone(), identity.clone())))
    }

    /// Store `identity` under `local_id`, replacing any previous record
    pub async fn insert(&self, local_id: &str, identity: LocalIdentity) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.loaded().await?.insert(local_id.to_string(), identity);
        state.persist().await
    }

    /// Append a newly registered passkey and advance `last_seq`
    ///
    /// If the identity disappeared meanwhile, it is recreated around the
    /// passkey.
    pub async fn append_passkey(&self, local_id: &str, entry: PasskeyEntry) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let identities = state.loaded().await?;
        match identities.get_mut(local_id) {
            Some(identity) => {
                identity.last_seq = identity.last_seq.max(entry.seq);
                identity.passkeys.push(entry);
            }
            None => {
                identities.insert(local_id.to_string(), LocalIdentity::with_first_passkey(entry));
            }
        }
        state.persist().await
    }

    /// Delete an identity; returns whether it existed
    pub async fn remove(&self, local_id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        let removed = state.loaded().await?.remove(local_id).is_some();
        state.persist().await?;
        Ok(removed)
    }

    /// Switch to a different backend; the next access reloads from it
    pub async fn reconfigure(&self, store: Arc<dyn StorageAdapter>) {
        let mut state = self.state.lock().await;
        state.store = store;
        state.identities = None;
    }

    /// Storage type of the current backend
    pub async fn storage_type(&self) -> StorageType {
        self.state.lock().await.store.storage_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::PasskeyPublicKey;
    use crate::core_storage::MemoryStore;
    use serde_json::json;

    fn entry(seq: u16, credential_id: &str) -> PasskeyEntry {
        let key = PasskeyPublicKey {
            algo_cose: -8,
            raw: vec![seq as u8; 32],
            spki: vec![0x30; 44],
        };
        PasskeyEntry::new(seq, credential_id, key).unwrap()
    }

    #[tokio::test]
    async fn test_insert_persists_record() {
        let store = Arc::new(MemoryStore::new());
        let registry = IdentityRegistry::new(store.clone());

        registry
            .insert("alice", LocalIdentity::with_first_passkey(entry(1, "c1")))
            .await
            .unwrap();

        let record = store.get(IDENTITIES_RECORD_KEY).await.unwrap().unwrap();
        assert_eq!(record["alice"]["lastSeq"], json!(1));
        assert_eq!(record["alice"]["passkeys"][0]["credentialID"], json!("c1"));
    }

    #[tokio::test]
    async fn test_empty_registry_removes_record() {
        let store = Arc::new(MemoryStore::new());
        let registry = IdentityRegistry::new(store.clone());
        registry
            .insert("alice", LocalIdentity::with_first_passkey(entry(1, "c1")))
            .await
            .unwrap();

        assert!(registry.remove("alice").await.unwrap());
        assert!(!store.has(IDENTITIES_RECORD_KEY).await.unwrap());
        assert!(!registry.remove("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_load_drops_only_tampered_identity() {
        let store = Arc::new(MemoryStore::new());
        let writer = IdentityRegistry::new(store.clone());
        writer
            .insert("a", LocalIdentity::with_first_passkey(entry(1, "ca")))
            .await
            .unwrap();
        writer
            .insert("b", LocalIdentity::with_first_passkey(entry(1, "cb")))
            .await
            .unwrap();

        let mut record = store.get(IDENTITIES_RECORD_KEY).await.unwrap().unwrap();
        record["b"]["passkeys"][0]["seq"] = json!(9);
        store.set(IDENTITIES_RECORD_KEY, record).await.unwrap();

        let reader = IdentityRegistry::new(store);
        assert_eq!(reader.list().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_non_object_record_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(IDENTITIES_RECORD_KEY, json!([1, 2])).await.unwrap();

        let registry = IdentityRegistry::new(store);
        assert!(registry.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_passkey_advances_seq() {
        let registry = IdentityRegistry::new(Arc::new(MemoryStore::new()));
        registry
            .insert("alice", LocalIdentity::with_first_passkey(entry(1, "c1")))
            .await
            .unwrap();
        registry.append_passkey("alice", entry(2, "c2")).await.unwrap();

        let identity = registry.get("alice").await.unwrap().unwrap();
        assert_eq!(identity.last_seq, 2);
        assert_eq!(identity.credential_ids(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_find_by_credential() {
        let registry = IdentityRegistry::new(Arc::new(MemoryStore::new()));
        registry
            .insert("a", LocalIdentity::with_first_passkey(entry(1, "ca")))
            .await
            .unwrap();
        registry
            .insert("b", LocalIdentity::with_first_passkey(entry(1, "cb")))
            .await
            .unwrap();

        let (local_id, _) = registry.find_by_credential("cb").await.unwrap().unwrap();
        assert_eq!(local_id, "b");
        assert!(registry.find_by_credential("CB").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconfigure_reloads_from_new_store() {
        let first = Arc::new(MemoryStore::new());
        let registry = IdentityRegistry::new(first);
        registry
            .insert("a", LocalIdentity::with_first_passkey(entry(1, "ca")))
            .await
            .unwrap();

        registry.reconfigure(Arc::new(MemoryStore::new())).await;
        assert!(registry.list().await.unwrap().is_empty());
    }
}
