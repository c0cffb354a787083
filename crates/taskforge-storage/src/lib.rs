//! Taskforge Storage
//!
//! Durable document store used by the orchestration core: plain files under a
//! workspace root (or an in-memory map for tests), workspace-wide locking for
//! read-modify-write cycles, and an injectable clock.

pub mod clock;
pub mod error;
pub mod fs_store;
pub mod lock;
pub mod memory_store;
pub mod store;

#[cfg(test)]
mod store_properties;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{IoOperation, StorageError, StorageResult};
pub use fs_store::FsStore;
pub use lock::{StoreLock, WorkspaceLocker, LOCK_FILE};
pub use memory_store::MemoryStore;
pub use store::DurableStore;
