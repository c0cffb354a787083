//! Orchestrator facade
//!
//! Wires the repository, scheduler, workflow state and batch coordinator
//! over one store and clock. Single-task store operations run through the
//! configured retry policy; collaborators protect their own fallible work
//! with [`Orchestrator::guarded`].

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use taskforge_resilience::{CircuitBreakerRegistry, CircuitSnapshot, RetryPolicy};
use taskforge_storage::{Clock, DurableStore, FsStore, SystemClock};
use tracing::info;

use crate::audit_log::AuditEntry;
use crate::batch::{BatchCoordinator, BatchOperation, BatchReport};
use crate::config::{ConfigLoader, TaskforgeConfig};
use crate::error::OrchestratorResult;
use crate::index::TaskIndex;
use crate::lifecycle::TaskLifecycle;
use crate::models::{Phase, StateUpdate, Task, TaskSummary, WorkflowState};
use crate::repository::{RebuildReport, TaskFilter, TaskRepository, Transition};
use crate::resolver::{DependencyGraph, DependencyStatus};
use crate::scheduler::{NextTask, Scheduler};
use crate::state::{ArchiveOutcome, ClearOutcome, StateManager};

/// Entry point for every task and workflow operation
pub struct Orchestrator {
    config: TaskforgeConfig,
    repository: Arc<TaskRepository>,
    state: Arc<StateManager>,
    lifecycle: TaskLifecycle,
    batch: BatchCoordinator,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, config: TaskforgeConfig) -> Self {
        let repository = Arc::new(
            TaskRepository::new(Arc::clone(&store), Arc::clone(&clock))
                .with_metadata(config.index_metadata()),
        );
        let state = Arc::new(StateManager::new(store, Arc::clone(&clock)));
        let retry = RetryPolicy::new(config.retry_config());
        let lifecycle = TaskLifecycle::new(Arc::clone(&repository), Arc::clone(&state))
            .with_retry(retry.clone());

        Self {
            batch: BatchCoordinator::new(lifecycle.clone()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker_config(), clock),
            retry,
            repository,
            state,
            lifecycle,
            config,
        }
    }

    /// Open the filesystem workspace named by `config`
    pub fn open(config: TaskforgeConfig) -> Self {
        let store = FsStore::with_locking(&config.workspace.root, config.locking.enabled);
        info!("Opened workspace at {:?}", store.root());
        Self::new(Arc::new(store), Arc::new(SystemClock), config)
    }

    /// Load configuration for `project_dir` and open its workspace
    pub fn from_project(project_dir: &Path) -> OrchestratorResult<Self> {
        let config = ConfigLoader::new(project_dir).load()?;
        Ok(Self::open(config))
    }

    pub fn config(&self) -> &TaskforgeConfig {
        &self.config
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    // Tasks

    pub async fn create_task(&self, task: Task) -> OrchestratorResult<Task> {
        self.retry.execute(|| self.repository.create(task.clone())).await
    }

    pub async fn get_task(&self, id: &str) -> OrchestratorResult<Option<Task>> {
        self.retry.execute(|| self.repository.find_by_id(id)).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        self.retry.execute(|| self.repository.find_all(filter)).await
    }

    pub async fn next_task(&self) -> OrchestratorResult<NextTask> {
        let scheduler = Scheduler::new(&self.repository);
        self.retry.execute(|| scheduler.next_task()).await
    }

    // The lifecycle retries the task change and its state update separately

    pub async fn start_task(&self, id: &str) -> OrchestratorResult<Transition> {
        self.lifecycle.start(id).await
    }

    pub async fn complete_task(&self, id: &str) -> OrchestratorResult<Transition> {
        self.lifecycle.complete(id).await
    }

    pub async fn fail_task(&self, id: &str, reason: &str) -> OrchestratorResult<Transition> {
        self.lifecycle.fail(id, reason).await
    }

    pub async fn append_note(&self, id: &str, note: &str) -> OrchestratorResult<Task> {
        self.retry.execute(|| self.repository.append_note(id, note)).await
    }

    /// Batches are not retried as a whole; atomic ones roll back instead
    pub async fn batch_operations(
        &self,
        operations: &[BatchOperation],
        atomic: bool,
    ) -> OrchestratorResult<BatchReport> {
        self.batch.execute(operations, atomic).await
    }

    pub async fn summary(&self) -> OrchestratorResult<TaskSummary> {
        self.retry.execute(|| self.repository.summary()).await
    }

    pub async fn rebuild_index(&self) -> OrchestratorResult<RebuildReport> {
        self.repository.rebuild_index().await
    }

    pub async fn index(&self) -> OrchestratorResult<TaskIndex> {
        self.retry.execute(|| self.repository.index()).await
    }

    pub async fn dependency_status(&self, id: &str) -> OrchestratorResult<Vec<DependencyStatus>> {
        self.retry.execute(|| self.repository.dependency_status(id)).await
    }

    /// Every task id, dependencies before dependents
    pub async fn execution_order(&self) -> OrchestratorResult<Vec<String>> {
        let index = self.index().await?;
        DependencyGraph::from_index(&index).execution_order()
    }

    pub async fn audit_entries(&self) -> OrchestratorResult<Vec<AuditEntry>> {
        self.repository.audit_log().entries().await
    }

    // Workflow state

    pub async fn initialize_state(&self, phase: Option<Phase>) -> OrchestratorResult<WorkflowState> {
        self.retry.execute(|| self.state.initialize(phase)).await
    }

    pub async fn update_state(&self, update: StateUpdate) -> OrchestratorResult<WorkflowState> {
        self.retry.execute(|| self.state.update(update.clone())).await
    }

    pub async fn get_state(&self) -> OrchestratorResult<Option<WorkflowState>> {
        self.retry.execute(|| self.state.get()).await
    }

    pub async fn clear_state(&self, force: bool) -> OrchestratorResult<ClearOutcome> {
        self.state.clear(force).await
    }

    pub async fn archive_session(&self, force: bool) -> OrchestratorResult<ArchiveOutcome> {
        self.state.archive(force).await
    }

    // Resilience

    /// Run `operation` with retries inside the circuit breaker named `name`
    ///
    /// One outer call counts as a single breaker success or failure however
    /// many retries it took.
    pub async fn guarded<F, Fut, T>(&self, name: &str, operation: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let breaker = self.breakers.get_or_create(name);
        breaker.call(move || self.retry.execute(operation)).await
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshots()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace", &self.config.workspace.root)
            .field("breakers", &self.breakers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use taskforge_resilience::CircuitState;
    use taskforge_storage::{ManualClock, MemoryStore, StorageError};

    fn orchestrator(clock: Arc<ManualClock>) -> Orchestrator {
        let mut config = TaskforgeConfig::default();
        config.retry.initial_delay_ms = 0;
        config.retry.max_delay_ms = 0;
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.timeout_ms = 1_000;
        config.circuit_breaker.success_threshold = 1;
        Orchestrator::new(Arc::new(MemoryStore::new()), clock, config)
    }

    fn transient() -> OrchestratorError {
        OrchestratorError::Storage(StorageError::io_error(
            "state.json".into(),
            taskforge_storage::IoOperation::Write,
            std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted"),
        ))
    }

    #[tokio::test]
    async fn test_task_flow_through_facade() {
        let orchestrator = orchestrator(Arc::new(ManualClock::starting_now()));
        orchestrator.initialize_state(Some(Phase::Implement)).await.unwrap();
        orchestrator
            .create_task(Task::new("setup.init", "setup", "Init"))
            .await
            .unwrap();

        let next = orchestrator.next_task().await.unwrap();
        assert_eq!(next.task().map(|t| t.id.as_str()), Some("setup.init"));

        orchestrator.start_task("setup.init").await.unwrap();
        orchestrator.complete_task("setup.init").await.unwrap();
        assert_eq!(orchestrator.next_task().await.unwrap(), NextTask::Exhausted);
        assert_eq!(orchestrator.execution_order().await.unwrap(), vec!["setup.init"]);

        let actions: Vec<String> = orchestrator
            .audit_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action.to_string())
            .collect();
        assert_eq!(actions, vec!["CREATED", "STARTED", "COMPLETED"]);
    }

    #[tokio::test]
    async fn test_guarded_retries_transient_failures() {
        let orchestrator = orchestrator(Arc::new(ManualClock::starting_now()));
        let calls = AtomicU32::new(0);

        let value = orchestrator
            .guarded("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orchestrator.breaker_snapshots()[0].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_guarded_opens_breaker() {
        let clock = Arc::new(ManualClock::starting_now());
        let orchestrator = orchestrator(clock.clone());
        let calls = AtomicU32::new(0);
        let failing = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OrchestratorError::validation("heal", "still broken")) }
        };

        for _ in 0..2 {
            let err = orchestrator.guarded("heal", failing).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation { .. }));
        }
        let err = orchestrator.guarded("heal", failing).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CircuitOpen(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_millis(1_000));
        orchestrator
            .guarded("heal", || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(orchestrator.breaker_snapshots()[0].state, CircuitState::Closed);
    }
}
