//! Batch execution of task transitions
//!
//! Non-atomic batches run every operation and report each outcome. Atomic
//! batches capture every referenced task and the workflow state up front;
//! the first failure restores whatever was touched and surfaces as a single
//! [`OrchestratorError::BatchFailed`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, OrchestratorError, OrchestratorResult};
use crate::lifecycle::TaskLifecycle;
use crate::models::{Task, WorkflowState};
use crate::repository::Transition;

const DEFAULT_FAIL_REASON: &str = "Marked failed by batch operation";

/// One transition in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BatchOperation {
    Start {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    Done {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    Fail {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl BatchOperation {
    pub fn start(task_id: impl Into<String>) -> Self {
        BatchOperation::Start {
            task_id: task_id.into(),
        }
    }

    pub fn done(task_id: impl Into<String>) -> Self {
        BatchOperation::Done {
            task_id: task_id.into(),
        }
    }

    pub fn fail(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        BatchOperation::Fail {
            task_id: task_id.into(),
            reason: Some(reason.into()),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            BatchOperation::Start { task_id }
            | BatchOperation::Done { task_id }
            | BatchOperation::Fail { task_id, .. } => task_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            BatchOperation::Start { .. } => "start",
            BatchOperation::Done { .. } => "done",
            BatchOperation::Fail { .. } => "fail",
        }
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    pub action: String,
    pub task_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub atomic: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchReport {
    fn from_results(atomic: bool, results: Vec<BatchItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            atomic,
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// Executes ordered lists of [`BatchOperation`]s
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    lifecycle: TaskLifecycle,
}

impl BatchCoordinator {
    pub fn new(lifecycle: TaskLifecycle) -> Self {
        Self { lifecycle }
    }

    /// Run `operations` in order
    pub async fn execute(
        &self,
        operations: &[BatchOperation],
        atomic: bool,
    ) -> OrchestratorResult<BatchReport> {
        if atomic {
            self.execute_atomic(operations).await
        } else {
            let mut results = Vec::with_capacity(operations.len());
            for (index, operation) in operations.iter().enumerate() {
                let outcome = self.apply(operation).await;
                if let Err(e) = &outcome {
                    warn!("Batch operation {} ({} {}) failed: {}", index, operation.action(), operation.task_id(), e);
                }
                results.push(item_result(index, operation, outcome));
            }
            Ok(BatchReport::from_results(false, results))
        }
    }

    async fn execute_atomic(&self, operations: &[BatchOperation]) -> OrchestratorResult<BatchReport> {
        let repository = self.lifecycle.repository();

        let mut snapshots: HashMap<&str, Task> = HashMap::new();
        for operation in operations {
            let id = operation.task_id();
            if snapshots.contains_key(id) {
                continue;
            }
            if let Some(task) = repository.find_by_id(id).await? {
                snapshots.insert(id, task);
            }
        }
        let state_snapshot = self.lifecycle.state().get().await?;

        let mut touched: Vec<&str> = Vec::new();
        let mut results = Vec::with_capacity(operations.len());

        for (index, operation) in operations.iter().enumerate() {
            // A failing operation may still have written its task
            if !touched.contains(&operation.task_id()) {
                touched.push(operation.task_id());
            }
            match self.apply(operation).await {
                Ok(transition) => {
                    results.push(item_result(index, operation, Ok(transition)));
                }
                Err(source) => {
                    warn!(
                        "Atomic batch failed at operation {} ({} {}): {}; rolling back",
                        index,
                        operation.action(),
                        operation.task_id(),
                        source
                    );
                    let (restored, rollback_failures) = self
                        .rollback(&touched, &snapshots, state_snapshot.as_ref())
                        .await;
                    return Err(OrchestratorError::BatchFailed {
                        index,
                        action: operation.action().to_string(),
                        task_id: operation.task_id().to_string(),
                        source: Box::new(source),
                        restored,
                        rollback_failures,
                    });
                }
            }
        }

        info!("Atomic batch of {} operation(s) applied", operations.len());
        Ok(BatchReport::from_results(true, results))
    }

    async fn rollback(
        &self,
        touched: &[&str],
        snapshots: &HashMap<&str, Task>,
        state: Option<&WorkflowState>,
    ) -> (usize, Vec<String>) {
        let mut restored = 0;
        let mut failures = Vec::new();

        for id in touched.iter().rev() {
            let Some(snapshot) = snapshots.get(id) else {
                continue;
            };
            match self.lifecycle.repository().find_by_id(id).await {
                Ok(Some(current)) if current == *snapshot => continue,
                Ok(_) => {}
                Err(e) => debug!("Could not read task {} before rollback: {}", id, e),
            }
            match self.lifecycle.repository().restore(snapshot).await {
                Ok(()) => {
                    warn!("Rolled back task {} to {}", id, snapshot.status);
                    restored += 1;
                }
                Err(e) => {
                    warn!("Failed to roll back task {}: {}", id, e);
                    failures.push(format!("{}: {}", id, e));
                }
            }
        }

        if let Err(e) = self.lifecycle.state().restore(state).await {
            warn!("Failed to roll back workflow state: {}", e);
            failures.push(format!("workflow state: {}", e));
        }

        (restored, failures)
    }

    async fn apply(&self, operation: &BatchOperation) -> OrchestratorResult<Transition> {
        match operation {
            BatchOperation::Start { task_id } => self.lifecycle.start(task_id).await,
            BatchOperation::Done { task_id } => self.lifecycle.complete(task_id).await,
            BatchOperation::Fail { task_id, reason } => {
                let reason = reason.as_deref().unwrap_or(DEFAULT_FAIL_REASON);
                self.lifecycle.fail(task_id, reason).await
            }
        }
    }
}

fn item_result(
    index: usize,
    operation: &BatchOperation,
    outcome: OrchestratorResult<Transition>,
) -> BatchItemResult {
    let (success, task, error, code) = match outcome {
        Ok(transition) => (true, Some(transition.task), None, None),
        Err(e) => (false, None, Some(e.to_string()), Some(e.code())),
    };
    BatchItemResult {
        index,
        action: operation.action().to_string(),
        task_id: operation.task_id().to_string(),
        success,
        task,
        error,
        code,
    }
}
