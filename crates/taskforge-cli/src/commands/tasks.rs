// Task commands: create, inspect, list and transition tasks

use serde_json::{json, Value};
use taskforge_orchestration::{Orchestrator, OrchestratorError, SortKey, Task, TaskFilter, TaskStatus};

use super::Command;
use crate::error::{CliError, CliResult};
use crate::output::to_json;

/// Create a new pending task
#[derive(Debug, Clone)]
pub struct CreateCommand {
    pub task: Task,
}

impl CreateCommand {
    pub fn new(id: String, module: String, description: String) -> Self {
        Self {
            task: Task::new(id, module, description),
        }
    }

    pub fn with_priority(mut self, priority: Option<i64>) -> Self {
        if let Some(priority) = priority {
            self.task = self.task.with_priority(priority);
        }
        self
    }

    pub fn with_estimate(mut self, minutes: Option<u32>) -> Self {
        if let Some(minutes) = minutes {
            self.task = self.task.with_estimated_minutes(minutes);
        }
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.task = self.task.with_dependencies(dependencies);
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.task = self.task.with_acceptance_criteria(criteria);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        if let Some(notes) = notes {
            self.task = self.task.with_notes(notes);
        }
        self
    }
}

#[async_trait::async_trait]
impl Command for CreateCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let created = orchestrator.create_task(self.task.clone()).await?;
        to_json(&created)
    }
}

/// Show one task
#[derive(Debug, Clone)]
pub struct GetCommand {
    pub id: String,
}

impl GetCommand {
    pub fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait::async_trait]
impl Command for GetCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        match orchestrator.get_task(&self.id).await? {
            Some(task) => to_json(&task),
            None => Err(OrchestratorError::TaskNotFound {
                id: self.id.clone(),
            }
            .into()),
        }
    }
}

/// List tasks matching a filter
#[derive(Debug, Clone, Default)]
pub struct ListCommand {
    pub status: Option<String>,
    pub module: Option<String>,
    pub priority: Option<i64>,
    pub ready: bool,
    pub offset: usize,
    pub limit: Option<usize>,
    pub sort: Option<String>,
}

impl ListCommand {
    /// Build the repository filter, rejecting unknown status or sort names
    pub fn filter(&self) -> CliResult<TaskFilter> {
        let mut filter = TaskFilter::new();
        if let Some(status) = &self.status {
            filter = filter.with_status(status.parse::<TaskStatus>()?);
        }
        if let Some(module) = &self.module {
            filter = filter.with_module(module.clone());
        }
        if let Some(priority) = self.priority {
            filter = filter.with_priority(priority);
        }
        if self.ready {
            filter = filter.ready_only();
        }
        if let Some(sort) = &self.sort {
            filter = filter.sorted_by(sort.parse::<SortKey>()?);
        }
        match self.limit {
            Some(0) => return Err(CliError::invalid_argument("--limit must be at least 1")),
            Some(limit) => filter = filter.page(self.offset, limit),
            None => filter.offset = self.offset,
        }
        Ok(filter)
    }
}

#[async_trait::async_trait]
impl Command for ListCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let tasks = orchestrator.list_tasks(&self.filter()?).await?;
        Ok(json!({ "count": tasks.len(), "tasks": to_json(&tasks)? }))
    }
}

/// Pick the next task to work on
#[derive(Debug, Clone, Default)]
pub struct NextCommand;

#[async_trait::async_trait]
impl Command for NextCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.next_task().await?)
    }
}

/// Move a task through its lifecycle
#[derive(Debug, Clone)]
pub enum TransitionCommand {
    Start { id: String },
    Done { id: String },
    Fail { id: String, reason: String },
}

#[async_trait::async_trait]
impl Command for TransitionCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let transition = match self {
            TransitionCommand::Start { id } => orchestrator.start_task(id).await?,
            TransitionCommand::Done { id } => orchestrator.complete_task(id).await?,
            TransitionCommand::Fail { id, reason } => orchestrator.fail_task(id, reason).await?,
        };
        to_json(&transition)
    }
}

/// Append a timestamped note
#[derive(Debug, Clone)]
pub struct NoteCommand {
    pub id: String,
    pub note: String,
}

#[async_trait::async_trait]
impl Command for NoteCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.append_note(&self.id, &self.note).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_flags() {
        let cmd = ListCommand {
            status: Some("in_progress".into()),
            module: Some("auth".into()),
            ready: false,
            offset: 2,
            limit: Some(5),
            sort: Some("priority".into()),
            ..ListCommand::default()
        };
        let filter = cmd.filter().unwrap();
        assert_eq!(filter.status, Some(TaskStatus::InProgress));
        assert_eq!(filter.module.as_deref(), Some("auth"));
        assert_eq!(filter.offset, 2);
        assert_eq!(filter.limit, Some(5));
        assert_eq!(filter.sort, Some(SortKey::Priority));
    }

    #[test]
    fn test_filter_rejects_unknown_names() {
        let bad_status = ListCommand {
            status: Some("done".into()),
            ..ListCommand::default()
        };
        assert!(matches!(
            bad_status.filter(),
            Err(CliError::Orchestrator(OrchestratorError::Validation { .. }))
        ));

        let zero_limit = ListCommand {
            limit: Some(0),
            ..ListCommand::default()
        };
        assert!(matches!(zero_limit.filter(), Err(CliError::InvalidArgument { .. })));
    }

    #[test]
    fn test_create_builder_skips_absent_flags() {
        let cmd = CreateCommand::new("a.one".into(), "a".into(), "One".into())
            .with_priority(None)
            .with_estimate(Some(15))
            .with_dependencies(vec!["setup.init".into()]);
        assert_eq!(cmd.task.priority, 1);
        assert_eq!(cmd.task.estimated_minutes, 15);
        assert_eq!(cmd.task.dependencies, vec!["setup.init"]);
        assert_eq!(cmd.task.notes, None);
    }
}
