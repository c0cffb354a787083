//! Durable document store abstraction
//!
//! Paths are relative, `/`-separated names under the store root
//! (e.g. `tasks/auth/auth.login.md`). Implementations must make `write`
//! replace small documents atomically enough that a reader never observes
//! a half-written file.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::lock::StoreLock;

/// Append/overwrite primitives over named documents
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Whether a document exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Read a document as UTF-8 text
    async fn read(&self, path: &str) -> StorageResult<String>;

    /// Replace a document's content, creating parent directories as needed
    async fn write(&self, path: &str, content: &str) -> StorageResult<()>;

    /// Append to a document, creating it if missing
    async fn append(&self, path: &str, content: &str) -> StorageResult<()>;

    /// Remove a document or a whole subtree; removing a missing path is not an error
    async fn remove(&self, path: &str) -> StorageResult<()>;

    /// List all documents under `prefix` (recursively), sorted, relative to the store root
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Acquire the workspace-wide exclusive lock for a read-modify-write cycle
    async fn lock(&self) -> StorageResult<StoreLock>;

    /// Copy one document to another path
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let content = self.read(from).await?;
        self.write(to, &content).await
    }

    /// Read a document if it exists
    async fn read_optional(&self, path: &str) -> StorageResult<Option<String>> {
        if self.exists(path).await? {
            Ok(Some(self.read(path).await?))
        } else {
            Ok(None)
        }
    }
}

/// Normalize a store path: strip leading `./` and `/`, reject `..` segments
pub(crate) fn normalize(path: &str) -> StorageResult<String> {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    let mut parts = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(crate::error::StorageError::invalid_path(
                    path,
                    "parent segments are not allowed",
                ))
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}
