//! In-memory storage backend

use super::{StorageAdapter, StorageError, StorageType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Helper to convert poison errors into StorageError
fn handle_poison<T>(_err: PoisonError<T>) -> StorageError {
    StorageError::Backend("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// In-memory store (non-persistent)
///
/// Clones share the same underlying map.
#[derive(Clone)]
pub struct MemoryStore {
    storage_type: StorageType,
    data: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty store tagged as `session-storage`
    pub fn new() -> Self {
        Self::with_type(StorageType::SessionStorage)
    }

    /// Create an empty store reporting the given storage type
    pub fn with_type(storage_type: StorageType) -> Self {
        MemoryStore {
            storage_type,
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().map_err(handle_poison)?.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.data.read().map_err(handle_poison)?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.data
            .write()
            .map_err(handle_poison)?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.write().map_err(handle_poison)?.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.read().map_err(handle_poison)?.keys().cloned().collect())
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(self
            .data
            .read()
            .map_err(handle_poison)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
