//! In-memory durable store
//!
//! Memory backend for tests and dry runs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::lock::StoreLock;
use crate::store::{normalize, DurableStore};

/// Thread-safe in-memory implementation of [`DurableStore`]
///
/// Clones share the same underlying documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents (for testing)
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the store holds no documents
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn under(prefix: &str, path: &str) -> bool {
        prefix.is_empty() || path == prefix || path.starts_with(&format!("{}/", prefix))
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let path = normalize(path)?;
        Ok(self.documents.read().contains_key(&path))
    }

    async fn read(&self, path: &str) -> StorageResult<String> {
        let key = normalize(path)?;
        self.documents
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn write(&self, path: &str, content: &str) -> StorageResult<()> {
        let key = normalize(path)?;
        if key.is_empty() {
            return Err(StorageError::invalid_path(path, "empty document name"));
        }
        self.documents.write().insert(key, content.to_string());
        Ok(())
    }

    async fn append(&self, path: &str, content: &str) -> StorageResult<()> {
        let key = normalize(path)?;
        if key.is_empty() {
            return Err(StorageError::invalid_path(path, "empty document name"));
        }
        self.documents
            .write()
            .entry(key)
            .or_default()
            .push_str(content);
        Ok(())
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        let prefix = normalize(path)?;
        self.documents
            .write()
            .retain(|key, _| !Self::under(&prefix, key));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = normalize(prefix)?;
        Ok(self
            .documents
            .read()
            .keys()
            .filter(|key| Self::under(&prefix, key))
            .cloned()
            .collect())
    }

    async fn lock(&self) -> StorageResult<StoreLock> {
        Ok(StoreLock::noop())
    }
}
