//! Storage module
//!
//! Pluggable key-value persistence for the identity registry.
//!
//! A backend is anything implementing [`StorageAdapter`]. Backends are
//! selected either by a [`StorageType`] tag (opened with [`open_storage`]) or
//! supplied directly as an `Arc<dyn StorageAdapter>`.
//!
//! Shipped backends:
//! - [`MemoryStore`]: process-lifetime map (`session-storage`)
//! - [`FileStore`]: one JSON file per key (every other storage type)

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Unrecognized storage type ('{0}')")]
    UnrecognizedType(String),
}

/// Key-value storage capability
///
/// Values are JSON documents. Implementations must be safe to share between
/// tasks.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Which storage type this adapter provides
    fn storage_type(&self) -> StorageType;

    /// Whether a value is stored under `key`
    async fn has(&self, key: &str) -> Result<bool, StorageError>;

    /// Load the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove `key`; returns whether anything was removed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// All stored keys
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// All stored key/value pairs
    async fn entries(&self) -> Result<Vec<(String, Value)>, StorageError>;
}

/// Storage type tags understood by [`open_storage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Idb,
    LocalStorage,
    SessionStorage,
    Cookie,
    Opfs,
    OpfsWorker,
}

impl StorageType {
    /// All storage types, in declaration order
    pub const ALL: [StorageType; 6] = [
        StorageType::Idb,
        StorageType::LocalStorage,
        StorageType::SessionStorage,
        StorageType::Cookie,
        StorageType::Opfs,
        StorageType::OpfsWorker,
    ];

    /// Canonical string tag
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Idb => "idb",
            StorageType::LocalStorage => "local-storage",
            StorageType::SessionStorage => "session-storage",
            StorageType::Cookie => "cookie",
            StorageType::Opfs => "opfs",
            StorageType::OpfsWorker => "opfs-worker",
        }
    }

    /// Whether data in this storage type outlives the process
    pub fn is_persistent(&self) -> bool {
        !matches!(self, StorageType::SessionStorage)
    }
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Idb
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StorageError::UnrecognizedType(s.to_string()))
    }
}

impl serde::Serialize for StorageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for StorageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Either a storage type to open, or a ready adapter
#[derive(Clone)]
pub enum StorageChoice {
    Type(StorageType),
    Adapter(Arc<dyn StorageAdapter>),
}

impl fmt::Debug for StorageChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageChoice::Type(t) => f.debug_tuple("Type").field(t).finish(),
            StorageChoice::Adapter(a) => f
                .debug_tuple("Adapter")
                .field(&a.storage_type())
                .finish(),
        }
    }
}

impl From<StorageType> for StorageChoice {
    fn from(t: StorageType) -> Self {
        StorageChoice::Type(t)
    }
}

impl From<Arc<dyn StorageAdapter>> for StorageChoice {
    fn from(adapter: Arc<dyn StorageAdapter>) -> Self {
        StorageChoice::Adapter(adapter)
    }
}

/// Open the backend for `storage_type`
///
/// Persistent types live in `<data_dir>/<storage-type>/`.
pub fn open_storage(
    storage_type: StorageType,
    data_dir: &Path,
) -> Result<Arc<dyn StorageAdapter>, StorageError> {
    if storage_type.is_persistent() {
        let store = FileStore::new(data_dir.join(storage_type.as_str()), storage_type)?;
        Ok(Arc::new(store))
    } else {
        Ok(Arc::new(MemoryStore::with_type(storage_type)))
    }
}

/// Resolve a [`StorageChoice`] into an adapter
pub fn resolve_storage(
    choice: StorageChoice,
    data_dir: &Path,
) -> Result<Arc<dyn StorageAdapter>, StorageError> {
    match choice {
        StorageChoice::Type(t) => open_storage(t, data_dir),
        StorageChoice::Adapter(adapter) => Ok(adapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_type_parse() {
        for t in StorageType::ALL {
            assert_eq!(t.as_str().parse::<StorageType>().unwrap(), t);
        }
        assert_eq!("opfs-worker".parse::<StorageType>().unwrap(), StorageType::OpfsWorker);
    }

    #[test]
    fn test_storage_type_rejects_unknown() {
        let err = "floppy".parse::<StorageType>().unwrap_err();
        assert!(matches!(err, StorageError::UnrecognizedType(ref s) if s == "floppy"));
        assert_eq!(err.to_string(), "Unrecognized storage type ('floppy')");
    }

    #[test]
    fn test_storage_type_serde() {
        let json = serde_json::to_string(&StorageType::LocalStorage).unwrap();
        assert_eq!(json, "\"local-storage\"");
        let back: StorageType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StorageType::LocalStorage);
        assert!(serde_json::from_str::<StorageType>("\"nope\"").is_err());
    }

    #[tokio::test]
    async fn test_open_storage_session_is_memory() {
        let dir = TempDir::new().unwrap();
        let store = open_storage(StorageType::SessionStorage, dir.path()).unwrap();
        assert_eq!(store.storage_type(), StorageType::SessionStorage);

        store.set("k", serde_json::json!(1)).await.unwrap();
        // Nothing touches disk for session storage
        assert!(!dir.path().join("session-storage").exists());
    }

    #[tokio::test]
    async fn test_open_storage_persistent_uses_subdir() {
        let dir = TempDir::new().unwrap();
        let store = open_storage(StorageType::Idb, dir.path()).unwrap();
        assert_eq!(store.storage_type(), StorageType::Idb);
        assert!(dir.path().join("idb").is_dir());
    }

    #[tokio::test]
    async fn test_resolve_storage_passes_adapter_through() {
        let dir = TempDir::new().unwrap();
        let mem: Arc<dyn StorageAdapter> = Arc::new(MemoryStore::new());
        mem.set("x", serde_json::json!("y")).await.unwrap();

        let resolved = resolve_storage(StorageChoice::Adapter(mem), dir.path()).unwrap();
        assert_eq!(resolved.get("x").await.unwrap(), Some(serde_json::json!("y")));
    }
}
