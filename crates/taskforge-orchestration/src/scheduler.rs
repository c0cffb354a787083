//! Dependency-aware task selection
//!
//! A pending task is ready when every dependency exists and is completed.
//! The next task is the ready task with the lowest priority value; equal
//! priorities go to whichever task was created first.

use serde::Serialize;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::index::TaskIndex;
use crate::models::{Task, TaskStatus};
use crate::repository::TaskRepository;
use crate::resolver::DependencyGraph;

/// Outcome of asking for the next task
///
/// Only `Ready` carries work; the other variants explain why there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextTask {
    Ready { task: Task },
    /// No pending tasks remain
    Exhausted,
    /// Pending tasks wait on dependencies that are not completed yet
    Waiting { pending: Vec<String> },
    /// Pending tasks depend on each other in a cycle and can never run
    Blocked { cycle: Vec<String> },
}

impl NextTask {
    pub fn task(&self) -> Option<&Task> {
        match self {
            NextTask::Ready { task } => Some(task),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<Task> {
        match self {
            NextTask::Ready { task } => Some(task),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, NextTask::Ready { .. })
    }
}

/// Decision over an index snapshot, before the task record is loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Ready(String),
    Exhausted,
    Waiting(Vec<String>),
    Blocked(Vec<String>),
}

/// Pick the next task id from an index snapshot
pub fn select(index: &TaskIndex) -> Selection {
    let mut best: Option<(&str, i64)> = None;
    let mut pending = Vec::new();

    for (id, entry) in index.entries() {
        if entry.status != TaskStatus::Pending {
            continue;
        }
        pending.push(id.to_string());
        if !index.is_ready(entry) {
            continue;
        }
        // Strict comparison keeps the earliest task among equal priorities
        if best.map_or(true, |(_, priority)| entry.priority < priority) {
            best = Some((id, entry.priority));
        }
    }

    if let Some((id, _)) = best {
        return Selection::Ready(id.to_string());
    }
    if pending.is_empty() {
        return Selection::Exhausted;
    }
    match DependencyGraph::from_index_with_status(index, TaskStatus::Pending).find_cycle() {
        Some(cycle) => Selection::Blocked(cycle),
        None => Selection::Waiting(pending),
    }
}

/// Selects the next eligible task from a repository
pub struct Scheduler<'a> {
    repository: &'a TaskRepository,
}

impl<'a> Scheduler<'a> {
    pub fn new(repository: &'a TaskRepository) -> Self {
        Self { repository }
    }

    /// Select and load the next task under a single workspace lock
    pub async fn next_task(&self) -> OrchestratorResult<NextTask> {
        let (selection, task) = self
            .repository
            .read_chosen(|index| {
                let selection = select(index);
                let id = match &selection {
                    Selection::Ready(id) => Some(id.clone()),
                    _ => None,
                };
                (selection, id)
            })
            .await?;

        Ok(match selection {
            Selection::Ready(id) => match task {
                Some(task) => NextTask::Ready { task },
                None => return Err(OrchestratorError::TaskNotFound { id }),
            },
            Selection::Exhausted => NextTask::Exhausted,
            Selection::Waiting(pending) => NextTask::Waiting { pending },
            Selection::Blocked(cycle) => {
                tracing::warn!("Pending tasks form a dependency cycle: {}", cycle.join(" -> "));
                NextTask::Blocked { cycle }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexEntry, IndexMetadata};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use taskforge_storage::{
        DurableStore, ManualClock, MemoryStore, StorageResult, StoreLock,
    };

    fn index(tasks: &[(&str, i64, TaskStatus, &[&str])]) -> TaskIndex {
        let mut index = TaskIndex::new(IndexMetadata::default(), Utc::now());
        for (id, priority, status, deps) in tasks {
            index.upsert(
                id,
                IndexEntry {
                    status: *status,
                    priority: *priority,
                    module: "m".into(),
                    description: "d".into(),
                    file_path: format!("tasks/m/{}.md", id),
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                },
            );
        }
        index
    }

    use TaskStatus::*;

    #[test]
    fn test_lowest_priority_wins() {
        let idx = index(&[("a", 3, Pending, &[]), ("b", 1, Pending, &[]), ("c", 2, Pending, &[])]);
        assert_eq!(select(&idx), Selection::Ready("b".into()));
    }

    #[test]
    fn test_ties_go_to_first_created() {
        let idx = index(&[("z", 1, Pending, &[]), ("a", 1, Pending, &[])]);
        assert_eq!(select(&idx), Selection::Ready("z".into()));
    }

    #[test]
    fn test_skips_tasks_with_unfinished_dependencies() {
        let idx = index(&[
            ("setup", 5, InProgress, &[]),
            ("login", 1, Pending, &["setup"]),
            ("docs", 9, Pending, &[]),
        ]);
        assert_eq!(select(&idx), Selection::Ready("docs".into()));
    }

    #[test]
    fn test_unknown_dependency_never_ready() {
        let idx = index(&[("login", 1, Pending, &["ghost"])]);
        assert_eq!(select(&idx), Selection::Waiting(vec!["login".into()]));
    }

    #[test]
    fn test_exhausted_when_nothing_pending() {
        assert_eq!(select(&index(&[])), Selection::Exhausted);
        let idx = index(&[("a", 1, Completed, &[]), ("b", 1, Failed, &[])]);
        assert_eq!(select(&idx), Selection::Exhausted);
    }

    #[test]
    fn test_cycle_reported_instead_of_starving() {
        let idx = index(&[("a", 1, Pending, &["b"]), ("b", 1, Pending, &["a"])]);
        match select(&idx) {
            Selection::Blocked(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()) && cycle.contains(&"b".to_string()));
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_next_task_serializes_with_outcome_tag() {
        let json = serde_json::to_value(NextTask::Waiting {
            pending: vec!["a".into()],
        })
        .unwrap();
        assert_eq!(json["outcome"], "waiting");
        assert_eq!(json["pending"][0], "a");
        assert_eq!(serde_json::to_value(NextTask::Exhausted).unwrap()["outcome"], "exhausted");
    }

    struct CountingStore {
        inner: MemoryStore,
        locks: AtomicUsize,
    }

    #[async_trait]
    impl DurableStore for CountingStore {
        async fn exists(&self, path: &str) -> StorageResult<bool> {
            self.inner.exists(path).await
        }
        async fn read(&self, path: &str) -> StorageResult<String> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, content: &str) -> StorageResult<()> {
            self.inner.write(path, content).await
        }
        async fn append(&self, path: &str, content: &str) -> StorageResult<()> {
            self.inner.append(path, content).await
        }
        async fn remove(&self, path: &str) -> StorageResult<()> {
            self.inner.remove(path).await
        }
        async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            self.inner.list(prefix).await
        }
        async fn lock(&self) -> StorageResult<StoreLock> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            self.inner.lock().await
        }
    }

    #[tokio::test]
    async fn test_next_task_reads_under_one_lock() {
        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            locks: AtomicUsize::new(0),
        });
        let repo = TaskRepository::new(store.clone(), Arc::new(ManualClock::starting_now()));
        repo.create(Task::new("a.one", "a", "One")).await.unwrap();
        repo.create(Task::new("a.two", "a", "Two").with_dependencies(["a.one"]))
            .await
            .unwrap();

        let before = store.locks.load(Ordering::SeqCst);
        let next = Scheduler::new(&repo).next_task().await.unwrap();
        assert_eq!(next.task().map(|t| t.id.as_str()), Some("a.one"));
        assert_eq!(store.locks.load(Ordering::SeqCst) - before, 1);
    }
}
