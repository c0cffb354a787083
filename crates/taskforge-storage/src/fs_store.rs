//! Filesystem-backed durable store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{IoOperation, StorageError, StorageResult};
use crate::lock::{StoreLock, WorkspaceLocker, LOCK_FILE};
use crate::store::{normalize, DurableStore};

/// Stores documents as plain files under a workspace root
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    locker: WorkspaceLocker,
}

impl FsStore {
    /// Create a store rooted at `root` with cross-process locking enabled
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_locking(root, true)
    }

    /// Create a store, choosing whether OS-level advisory locks are taken
    ///
    /// With `use_os_locks == false` the store relies on a single-writer
    /// assumption across processes; writers inside this process are still
    /// serialized.
    pub fn with_locking(root: impl Into<PathBuf>, use_os_locks: bool) -> Self {
        let root = root.into();
        let locker = WorkspaceLocker::new(&root, use_os_locks);
        Self { root, locker }
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let normalized = normalize(path)?;
        if normalized.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(normalized))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::directory_creation_failed(parent.to_path_buf(), e))?;
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl DurableStore for FsStore {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| StorageError::io_error(full, IoOperation::Read, e))
    }

    async fn read(&self, path: &str) -> StorageResult<String> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(path))
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(StorageError::InvalidEncoding {
                    path: path.into(),
                    message: e.to_string(),
                })
            }
            Err(e) => Err(StorageError::io_error(full, IoOperation::Read, e)),
        }
    }

    async fn write(&self, path: &str, content: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full).await?;

        // Write beside the target then rename over it
        let mut tmp_name = full.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = full.with_file_name(tmp_name);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StorageError::io_error(tmp.clone(), IoOperation::Write, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| StorageError::io_error(full.clone(), IoOperation::Move, e))?;

        debug!("Wrote {} bytes to {:?}", content.len(), full);
        Ok(())
    }

    async fn append(&self, path: &str, content: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(|e| StorageError::io_error(full.clone(), IoOperation::Append, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StorageError::io_error(full.clone(), IoOperation::Append, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::io_error(full, IoOperation::Append, e))?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io_error(full, IoOperation::Delete, e)),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        result.map_err(|e| StorageError::io_error(full, IoOperation::Delete, e))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let start = self.resolve(prefix)?;
        let mut files = Vec::new();

        if let Ok(metadata) = tokio::fs::metadata(&start).await {
            if metadata.is_file() {
                return Ok(self.relative(&start).into_iter().collect());
            }
        }
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io_error(dir, IoOperation::List, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io_error(dir.clone(), IoOperation::List, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io_error(path.clone(), IoOperation::List, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(rel) = self.relative(&path) {
                    if rel == LOCK_FILE || rel.ends_with(".tmp") {
                        continue;
                    }
                    files.push(rel);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn lock(&self) -> StorageResult<StoreLock> {
        self.locker.acquire().await
    }
}
