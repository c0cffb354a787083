//! Taskforge Orchestration
//!
//! Durable task queue for a multi-phase build workflow: task records with a
//! denormalized index, dependency-aware scheduling, the workflow phase state
//! machine, and batch transitions with rollback.

pub mod audit_log;
pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod resolver;
pub mod saga;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod repository_properties;

#[cfg(test)]
mod scheduler_properties;

pub use audit_log::{AuditAction, AuditEntry, AuditLog, AUDIT_LOG_PATH};
pub use batch::{BatchCoordinator, BatchItemResult, BatchOperation, BatchReport};
pub use config::{ConfigLoader, TaskforgeConfig, ENV_PREFIX, PROJECT_CONFIG_FILE};
pub use error::*;
pub use index::{IndexEntry, IndexMetadata, TaskIndex, INDEX_PATH, INDEX_VERSION};
pub use lifecycle::TaskLifecycle;
pub use models::*;
pub use orchestrator::Orchestrator;
pub use repository::{RebuildReport, SortKey, TaskFilter, TaskRepository, Transition};
pub use resolver::{DependencyGraph, DependencyStatus};
pub use saga::{Saga, SagaError, SagaReport, SagaStep};
pub use scheduler::{NextTask, Scheduler};
pub use state::{ArchiveOutcome, ClearOutcome, StateManager, ARCHIVE_DIR, STATE_PATH};
