//! Task status transitions with their workflow-state side effects
//!
//! The task change and the state update are retried separately. When the
//! state update still fails, the task record is put back so the two never
//! disagree.

use std::sync::Arc;

use taskforge_resilience::{RetryConfig, RetryPolicy};
use tracing::{debug, warn};

use crate::error::OrchestratorResult;
use crate::repository::{TaskRepository, Transition};
use crate::state::StateManager;

/// Runs a task transition, then updates the workflow state to match
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    repository: Arc<TaskRepository>,
    state: Arc<StateManager>,
    retry: RetryPolicy,
}

impl TaskLifecycle {
    /// Lifecycle without retries
    pub fn new(repository: Arc<TaskRepository>, state: Arc<StateManager>) -> Self {
        Self {
            repository,
            state,
            retry: RetryPolicy::new(RetryConfig::new().with_max_attempts(1)),
        }
    }

    /// Retry each step with `retry`
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub async fn start(&self, id: &str) -> OrchestratorResult<Transition> {
        let transition = self.retry.execute(|| self.repository.start(id)).await?;
        if !transition.changed {
            debug!("Start of {} changed nothing; state left as is", id);
            return Ok(transition);
        }
        let effect = self.retry.execute(|| self.state.on_task_started(id)).await;
        self.settle(transition, effect).await
    }

    pub async fn complete(&self, id: &str) -> OrchestratorResult<Transition> {
        let transition = self.retry.execute(|| self.repository.complete(id)).await?;
        if !transition.changed {
            return Ok(transition);
        }
        let effect = self.retry.execute(|| self.state.on_task_completed(id)).await;
        self.settle(transition, effect).await
    }

    pub async fn fail(&self, id: &str, reason: &str) -> OrchestratorResult<Transition> {
        let transition = self.retry.execute(|| self.repository.fail(id, reason)).await?;
        if !transition.changed {
            return Ok(transition);
        }
        let effect = self
            .retry
            .execute(|| self.state.on_task_failed(id, reason))
            .await;
        self.settle(transition, effect).await
    }

    // Undo the task change when its state side effect failed
    async fn settle(
        &self,
        transition: Transition,
        effect: OrchestratorResult<()>,
    ) -> OrchestratorResult<Transition> {
        let Err(e) = effect else {
            return Ok(transition);
        };
        let id = &transition.task.id;
        warn!("Workflow state update for {} failed, reverting task: {}", id, e);
        if let Some(previous) = &transition.previous {
            if let Err(undo) = self.retry.execute(|| self.repository.restore(previous)).await {
                warn!("Could not revert task {}: {}", id, undo);
            }
        }
        Err(e)
    }
}
