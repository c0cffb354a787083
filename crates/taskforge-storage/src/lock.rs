//! Workspace locking
//!
//! Two layers: an in-process async mutex serializes writers inside one
//! process, and an OS-level advisory lock (`fs2`) on `<root>/.lock`
//! serializes writers across processes sharing the same workspace.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Name of the lock file under the store root
pub const LOCK_FILE: &str = ".lock";

/// RAII guard for the workspace lock; released on drop
pub struct StoreLock {
    os_lock: Option<File>,
    _in_process: Option<OwnedMutexGuard<()>>,
}

impl StoreLock {
    /// A guard that holds nothing (single-writer mode, in-memory stores)
    pub fn noop() -> Self {
        Self {
            os_lock: None,
            _in_process: None,
        }
    }

    /// Whether an OS-level lock is held
    pub fn is_os_locked(&self) -> bool {
        self.os_lock.is_some()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = &self.os_lock {
            if let Err(e) = file.unlock() {
                warn!("Failed to release workspace lock: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("os_locked", &self.os_lock.is_some())
            .field("in_process", &self._in_process.is_some())
            .finish()
    }
}

/// Hands out [`StoreLock`] guards for one workspace root
#[derive(Debug, Clone)]
pub struct WorkspaceLocker {
    lock_path: PathBuf,
    in_process: Arc<Mutex<()>>,
    use_os_locks: bool,
}

impl WorkspaceLocker {
    /// Create a locker for `root`; OS locks are used when `use_os_locks` is set
    pub fn new(root: &Path, use_os_locks: bool) -> Self {
        Self {
            lock_path: root.join(LOCK_FILE),
            in_process: Arc::new(Mutex::new(())),
            use_os_locks,
        }
    }

    /// Acquire the lock, waiting for other holders in this process and others
    pub async fn acquire(&self) -> StorageResult<StoreLock> {
        let guard = Arc::clone(&self.in_process).lock_owned().await;

        if !self.use_os_locks {
            return Ok(StoreLock {
                os_lock: None,
                _in_process: Some(guard),
            });
        }

        let path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(|e| StorageError::Internal(format!("Lock task failed: {}", e)))??;

        debug!("Acquired workspace lock {:?}", self.lock_path);

        Ok(StoreLock {
            os_lock: Some(file),
            _in_process: Some(guard),
        })
    }
}

fn lock_file(path: &Path) -> StorageResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StorageError::directory_creation_failed(parent.to_path_buf(), e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| StorageError::LockFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    file.lock_exclusive().map_err(|e| StorageError::LockFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(file)
}
