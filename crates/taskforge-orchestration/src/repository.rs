//! Task repository
//!
//! Owns task records (`tasks/<module>/<id>.md`) and the index
//! (`tasks/index.json`). Every mutation rewrites the record and its index
//! entry while holding the workspace lock, so readers never see the two
//! disagree.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use taskforge_storage::{Clock, DurableStore};
use tracing::{debug, info, warn};

use crate::audit_log::{AuditAction, AuditLog};
use crate::document::{self, task_path};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::index::{IndexEntry, IndexMetadata, TaskIndex, INDEX_PATH};
use crate::models::{Task, TaskStatus, TaskSummary};
use crate::resolver::{self, DependencyGraph, DependencyStatus};
use crate::saga::Saga;

/// Sort key for listings; ties keep index order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Priority,
    Status,
    EstimatedMinutes,
}

impl std::str::FromStr for SortKey {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(SortKey::Priority),
            "status" => Ok(SortKey::Status),
            "estimatedMinutes" | "estimated_minutes" => Ok(SortKey::EstimatedMinutes),
            other => Err(OrchestratorError::validation(
                "sort",
                format!("unknown sort key '{}'", other),
            )),
        }
    }
}

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub module: Option<String>,
    pub priority: Option<i64>,
    /// Pending with every dependency completed
    pub ready: Option<bool>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub sort: Option<SortKey>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn ready_only(mut self) -> Self {
        self.ready = Some(true);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    fn matches(&self, index: &TaskIndex, entry: &IndexEntry) -> bool {
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self.module.as_deref().is_some_and(|m| m != entry.module) {
            return false;
        }
        if self.priority.is_some_and(|p| p != entry.priority) {
            return false;
        }
        if let Some(ready) = self.ready {
            let is_ready = entry.status == TaskStatus::Pending && index.is_ready(entry);
            if is_ready != ready {
                return false;
            }
        }
        true
    }
}

/// Result of a status transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub task: Task,
    /// False when the call was an idempotent no-op
    pub changed: bool,
    /// The record as it was before a change
    #[serde(skip)]
    pub previous: Option<Task>,
}

impl Transition {
    fn unchanged(task: Task) -> Self {
        Self {
            task,
            changed: false,
            previous: None,
        }
    }
}

/// Result of rebuilding the index from task records
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    /// Documents that could not be parsed or duplicated an id
    pub skipped: Vec<String>,
}

/// Task storage over a [`DurableStore`]
pub struct TaskRepository {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    metadata: IndexMetadata,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        let audit = AuditLog::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            audit,
            metadata: IndexMetadata::default(),
        }
    }

    /// Metadata written into a freshly created index
    pub fn with_metadata(mut self, metadata: IndexMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Snapshot of the index
    pub async fn index(&self) -> OrchestratorResult<TaskIndex> {
        let _lock = self.store.lock().await?;
        self.load_index().await
    }

    /// Read the index and the record `choose` names from it under one lock
    pub async fn read_chosen<T, F>(&self, choose: F) -> OrchestratorResult<(T, Option<Task>)>
    where
        F: FnOnce(&TaskIndex) -> (T, Option<String>),
    {
        let _lock = self.store.lock().await?;
        let index = self.load_index().await?;
        let (value, id) = choose(&index);
        let task = match id {
            Some(id) => self.load_task(&index, &id).await?,
            None => None,
        };
        Ok((value, task))
    }

    /// Create a task; fails if the id is taken or the dependencies would form a cycle
    pub async fn create(&self, task: Task) -> OrchestratorResult<Task> {
        task.validate()?;

        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;

        if index.contains(&task.id) {
            return Err(OrchestratorError::AlreadyExists { id: task.id });
        }

        let mut graph = DependencyGraph::from_index(&index);
        graph.add(&task.id, task.dependencies.iter().cloned());
        if let Some(cycle) = graph.cycle_through(&task.id) {
            return Err(OrchestratorError::DependencyCycle { cycle });
        }

        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Created, &task.id, None).await;
        info!("Created task {} in module {}", task.id, task.module);
        Ok(task)
    }

    /// Look up a task; absence is not an error
    pub async fn find_by_id(&self, id: &str) -> OrchestratorResult<Option<Task>> {
        let _lock = self.store.lock().await?;
        let index = self.load_index().await?;
        self.load_task(&index, id).await
    }

    /// List tasks matching `filter`
    pub async fn find_all(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let _lock = self.store.lock().await?;
        let index = self.load_index().await?;

        let mut tasks = Vec::new();
        for (id, entry) in index.entries() {
            if !filter.matches(&index, entry) {
                continue;
            }
            if let Some(task) = self.load_task(&index, id).await? {
                tasks.push(task);
            }
        }

        // Stable sorts keep index order between equal keys
        match filter.sort {
            Some(SortKey::Priority) => tasks.sort_by_key(|t| t.priority),
            Some(SortKey::Status) => tasks.sort_by_key(|t| t.status),
            Some(SortKey::EstimatedMinutes) => tasks.sort_by_key(|t| t.estimated_minutes),
            None => {}
        }

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(tasks.into_iter().skip(filter.offset).take(limit).collect())
    }

    /// Overwrite an existing task and refresh its index entry
    ///
    /// The status must stay as stored; use `start`, `complete` or `fail` to
    /// move it. Changed dependencies are checked for cycles like on `create`.
    pub async fn save(&self, task: Task) -> OrchestratorResult<Task> {
        task.validate()?;

        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        let stored = index
            .get(&task.id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task.id.clone(),
            })?;

        if stored.status != task.status {
            return Err(OrchestratorError::transition(&task.id, stored.status, task.status));
        }
        if stored.dependencies != task.dependencies {
            let mut graph = DependencyGraph::from_index(&index);
            graph.add(&task.id, task.dependencies.iter().cloned());
            if let Some(cycle) = graph.cycle_through(&task.id) {
                return Err(OrchestratorError::DependencyCycle { cycle });
            }
        }

        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Updated, &task.id, None).await;
        debug!("Saved task {} ({})", task.id, task.status);
        Ok(task)
    }

    /// Put back a previously captured copy of a task
    pub async fn restore(&self, snapshot: &Task) -> OrchestratorResult<()> {
        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        self.persist(&mut index, snapshot).await?;
        self.audit
            .record(AuditAction::Updated, &snapshot.id, Some("restored from snapshot"))
            .await;
        Ok(())
    }

    /// `pending -> in_progress`; requires every dependency to be completed
    ///
    /// Starting an `in_progress` or `completed` task is a no-op.
    pub async fn start(&self, id: &str) -> OrchestratorResult<Transition> {
        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        let mut task = self.require_task(&index, id).await?;

        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::InProgress | TaskStatus::Completed => {
                warn!("Task {} is already {}; start ignored", id, task.status);
                return Ok(Transition::unchanged(task));
            }
            other => {
                return Err(OrchestratorError::transition(id, other, TaskStatus::InProgress));
            }
        }

        let unmet: Vec<String> = task
            .dependencies
            .iter()
            .filter(|dep| index.status_of(dep) != Some(TaskStatus::Completed))
            .cloned()
            .collect();
        if !unmet.is_empty() {
            return Err(OrchestratorError::DependencyNotMet {
                id: id.to_string(),
                unmet,
            });
        }

        let previous = task.clone();
        task.status = TaskStatus::InProgress;
        task.started_at = Some(self.clock.now());
        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Started, id, None).await;
        info!("Started task {}", id);

        Ok(Transition {
            task,
            changed: true,
            previous: Some(previous),
        })
    }

    /// `in_progress -> completed`; completing a completed task is a no-op
    pub async fn complete(&self, id: &str) -> OrchestratorResult<Transition> {
        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        let mut task = self.require_task(&index, id).await?;

        match task.status {
            TaskStatus::InProgress => {}
            TaskStatus::Completed => {
                warn!("Task {} is already completed; complete ignored", id);
                return Ok(Transition::unchanged(task));
            }
            other => {
                return Err(OrchestratorError::transition(id, other, TaskStatus::Completed));
            }
        }

        let previous = task.clone();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(self.clock.now());
        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Completed, id, None).await;
        info!("Completed task {}", id);

        Ok(Transition {
            task,
            changed: true,
            previous: Some(previous),
        })
    }

    /// `in_progress -> failed`, recording `reason` in the notes
    pub async fn fail(&self, id: &str, reason: &str) -> OrchestratorResult<Transition> {
        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        let mut task = self.require_task(&index, id).await?;

        match task.status {
            TaskStatus::InProgress => {}
            TaskStatus::Failed => {
                warn!("Task {} has already failed; fail ignored", id);
                return Ok(Transition::unchanged(task));
            }
            other => {
                return Err(OrchestratorError::transition(id, other, TaskStatus::Failed));
            }
        }

        let previous = task.clone();
        task.status = TaskStatus::Failed;
        task.append_note(&self.stamp(&format!("Failed: {}", reason)));
        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Failed, id, Some(reason)).await;
        warn!("Task {} failed: {}", id, reason);

        Ok(Transition {
            task,
            changed: true,
            previous: Some(previous),
        })
    }

    /// Append a timestamped line to a task's notes
    pub async fn append_note(&self, id: &str, note: &str) -> OrchestratorResult<Task> {
        if note.trim().is_empty() {
            return Err(OrchestratorError::validation("note", "must not be empty"));
        }

        let _lock = self.store.lock().await?;
        let mut index = self.load_index().await?;
        let mut task = self.require_task(&index, id).await?;

        task.append_note(&self.stamp(note));
        self.persist(&mut index, &task).await?;
        self.audit.record(AuditAction::Updated, id, Some(note)).await;
        Ok(task)
    }

    /// Status of each dependency of `id`
    pub async fn dependency_status(&self, id: &str) -> OrchestratorResult<Vec<DependencyStatus>> {
        let _lock = self.store.lock().await?;
        let index = self.load_index().await?;
        let task = self.require_task(&index, id).await?;
        Ok(resolver::dependency_status(&index, &task.dependencies))
    }

    /// Counts per status
    pub async fn summary(&self) -> OrchestratorResult<TaskSummary> {
        let index = self.index().await?;
        Ok(TaskSummary::from_statuses(index.entries().map(|(_, e)| e.status)))
    }

    /// Regenerate the index from the task records on disk
    ///
    /// Known ids keep their position; newly found records are appended in
    /// path order.
    pub async fn rebuild_index(&self) -> OrchestratorResult<RebuildReport> {
        let _lock = self.store.lock().await?;
        let old = self.load_index().await.unwrap_or_else(|e| {
            warn!("Existing index unreadable, rebuilding from scratch: {}", e);
            TaskIndex::new(self.metadata.clone(), self.clock.now())
        });

        let mut report = RebuildReport::default();
        let mut found: Vec<(String, IndexEntry)> = Vec::new();
        let mut seen = HashSet::new();

        for path in self.store.list("tasks").await? {
            if !path.ends_with(".md") {
                continue;
            }
            let content = self.store.read(&path).await?;
            match document::parse(&path, &content) {
                Ok(task) if seen.insert(task.id.clone()) => {
                    let mut entry = IndexEntry::from(&task);
                    entry.file_path = path;
                    found.push((task.id, entry));
                }
                Ok(task) => {
                    warn!("Duplicate task id {} in {}", task.id, path);
                    report.skipped.push(path);
                }
                Err(e) => {
                    warn!("Skipping unreadable task record: {}", e);
                    report.skipped.push(path);
                }
            }
        }

        let position = |id: &str| {
            old.entries()
                .position(|(known, _)| known == id)
                .unwrap_or(usize::MAX)
        };
        found.sort_by_key(|(id, _)| position(id.as_str()));

        let mut index = TaskIndex::new(old.metadata.clone(), self.clock.now());
        for (id, entry) in found {
            index.upsert(&id, entry);
        }
        report.indexed = index.len();
        self.write_index(&mut index).await?;

        info!(
            "Rebuilt task index: {} indexed, {} skipped",
            report.indexed,
            report.skipped.len()
        );
        Ok(report)
    }

    // Helpers below assume the caller holds the workspace lock

    async fn load_index(&self) -> OrchestratorResult<TaskIndex> {
        match self.store.read_optional(INDEX_PATH).await? {
            Some(content) => serde_json::from_str(&content)
                .map_err(|e| OrchestratorError::parse(INDEX_PATH, e)),
            None => Ok(TaskIndex::new(self.metadata.clone(), self.clock.now())),
        }
    }

    async fn write_index(&self, index: &mut TaskIndex) -> OrchestratorResult<()> {
        index.updated_at = self.clock.now();
        let json = serde_json::to_string_pretty(index)
            .map_err(|e| OrchestratorError::parse(INDEX_PATH, e))?;
        self.store.write(INDEX_PATH, &json).await?;
        Ok(())
    }

    async fn load_task(&self, index: &TaskIndex, id: &str) -> OrchestratorResult<Option<Task>> {
        let Some(entry) = index.get(id) else {
            return Ok(None);
        };
        let Some(content) = self.store.read_optional(&entry.file_path).await? else {
            return Err(OrchestratorError::parse(
                entry.file_path.clone(),
                format!("index lists {} but the record is missing", id),
            ));
        };

        let task = document::parse(&entry.file_path, &content)?;
        if task.id != id {
            return Err(OrchestratorError::parse(
                entry.file_path.clone(),
                format!("record holds {} instead of {}", task.id, id),
            ));
        }
        Ok(Some(task))
    }

    async fn require_task(&self, index: &TaskIndex, id: &str) -> OrchestratorResult<Task> {
        self.load_task(index, id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })
    }

    /// Write the record, then the index
    ///
    /// If the index write fails the previous record text is put back (or the
    /// new record removed), so the record never runs ahead of the index.
    async fn persist(&self, index: &mut TaskIndex, task: &Task) -> OrchestratorResult<()> {
        let path = task_path(&task.module, &task.id);
        let moved_from = index
            .get(&task.id)
            .map(|entry| entry.file_path.clone())
            .filter(|old| *old != path);

        let rendered = document::render(task)?;
        let previous = self.store.read_optional(&path).await?;
        index.upsert(&task.id, IndexEntry::from(task));

        let store = self.store.as_ref();
        let (path_ref, rendered_ref, previous_ref) =
            (path.as_str(), rendered.as_str(), previous.as_deref());
        Saga::<OrchestratorError>::new(format!("persist {}", task.id))
            .step(
                "write record",
                move || async move {
                    Ok::<(), OrchestratorError>(store.write(path_ref, rendered_ref).await?)
                },
                move || async move {
                    match previous_ref {
                        Some(text) => store.write(path_ref, text).await?,
                        None => store.remove(path_ref).await?,
                    }
                    Ok::<(), OrchestratorError>(())
                },
            )
            .final_step("write index", move || self.write_index(index))
            .run()
            .await
            .map_err(|e| {
                for (step, failure) in &e.compensation_failures {
                    warn!("Undo of '{}' for {} failed: {}", step, task.id, failure);
                }
                e.into_source()
            })?;

        if let Some(old) = moved_from {
            self.store.remove(&old).await?;
        }
        Ok(())
    }

    fn stamp(&self, note: &str) -> String {
        format!("[{}] {}", self.clock.now().format("%Y-%m-%d %H:%M:%S UTC"), note)
    }
}

impl std::fmt::Debug for TaskRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRepository")
            .field("metadata", &self.metadata)
            .finish()
    }
}
