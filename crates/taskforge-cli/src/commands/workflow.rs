// Workflow state commands

use serde_json::Value;
use taskforge_orchestration::{NewError, Orchestrator, Phase, StateUpdate};

use super::Command;
use crate::error::{CliError, CliResult};
use crate::output::to_json;

/// Create the workflow state, keeping an existing one
#[derive(Debug, Clone, Default)]
pub struct InitCommand {
    pub phase: Option<String>,
}

#[async_trait::async_trait]
impl Command for InitCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let phase = self.phase.as_deref().map(str::parse::<Phase>).transpose()?;
        to_json(&orchestrator.initialize_state(phase).await?)
    }
}

/// Show the workflow state; `null` when there is none
#[derive(Debug, Clone, Default)]
pub struct StateCommand;

#[async_trait::async_trait]
impl Command for StateCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.get_state().await?)
    }
}

/// Apply a partial update to the workflow state
#[derive(Debug, Clone, Default)]
pub struct UpdateCommand {
    pub phase: Option<String>,
    pub current_task: Option<String>,
    pub clear_current_task: bool,
    /// JSON text; anything that does not parse is stored as a string
    pub prd: Option<String>,
    pub errors: Vec<String>,
    pub error_task: Option<String>,
}

impl UpdateCommand {
    pub fn to_update(&self) -> CliResult<StateUpdate> {
        if self.clear_current_task && self.current_task.is_some() {
            return Err(CliError::invalid_argument(
                "--current-task and --clear-current-task are mutually exclusive",
            ));
        }

        let mut update = StateUpdate {
            phase: self.phase.as_deref().map(str::parse::<Phase>).transpose()?,
            ..StateUpdate::default()
        };
        if self.clear_current_task {
            update = update.with_current_task(None);
        } else if let Some(task) = &self.current_task {
            update = update.with_current_task(Some(task.clone()));
        }
        if let Some(prd) = &self.prd {
            let value = serde_json::from_str(prd).unwrap_or_else(|_| Value::String(prd.clone()));
            update = update.with_prd(value);
        }
        for message in &self.errors {
            let mut error = NewError::new(message.clone());
            if let Some(task) = &self.error_task {
                error = error.for_task(task.clone());
            }
            update = update.with_error(error);
        }

        if update == StateUpdate::default() {
            return Err(CliError::invalid_argument("nothing to update"));
        }
        Ok(update)
    }
}

#[async_trait::async_trait]
impl Command for UpdateCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let update = self.to_update()?;
        to_json(&orchestrator.update_state(update).await?)
    }
}

/// Remove the workflow state
#[derive(Debug, Clone, Default)]
pub struct ClearCommand {
    pub force: bool,
}

#[async_trait::async_trait]
impl Command for ClearCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.clear_state(self.force).await?)
    }
}

/// Move the session into the archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveCommand {
    pub force: bool,
}

#[async_trait::async_trait]
impl Command for ArchiveCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.archive_session(self.force).await?)
    }
}
