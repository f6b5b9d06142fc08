//! File-based storage backend
//!
//! Each key is stored as `<hex(key)>.json` under the base directory.
//! Writes are atomic (write to temp, then rename).

use super::{StorageAdapter, StorageError, StorageType};
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const FILE_EXTENSION: &str = "json";

/// File-based JSON store
pub struct FileStore {
    /// Directory holding one file per key
    base_path: PathBuf,
    storage_type: StorageType,
}

impl FileStore {
    /// Create a new file store at the given path
    pub fn new(base_path: PathBuf, storage_type: StorageType) -> Result<Self, StorageError> {
        // Create directory if it doesn't exist
        fs::create_dir_all(&base_path)?;

        Ok(FileStore {
            base_path,
            storage_type,
        })
    }

    /// Directory this store writes to
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", hex::encode(key.as_bytes()), FILE_EXTENSION))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension()? != FILE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Write file atomically (write to temp, then rename)
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data).await?;
        tokio::fs::rename(temp_path, path).await?;
        Ok(())
    }

    async fn read_value(&self, path: &Path) -> Result<Option<Value>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageAdapter for FileStore {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.key_path(key)).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.read_value(&self.key_path(key)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let data = serde_json::to_vec(&value)?;
        self.write_atomic(&self.key_path(key), &data).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(key) = Self::key_from_path(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>, StorageError> {
        let mut entries = Vec::new();
        for key in self.keys().await? {
            // A file removed between listing and reading is skipped
            if let Some(value) = self.read_value(&self.key_path(&key)).await? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }
}
