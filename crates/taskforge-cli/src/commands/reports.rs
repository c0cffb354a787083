// Reporting and maintenance commands

use std::path::PathBuf;

use serde_json::{json, Value};
use taskforge_orchestration::Orchestrator;
use tracing::info;

use super::Command;
use crate::error::{CliError, CliResult};
use crate::output::to_json;

/// Per-status counts and percent complete
#[derive(Debug, Clone, Default)]
pub struct SummaryCommand;

#[async_trait::async_trait]
impl Command for SummaryCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.summary().await?)
    }
}

/// Every task in dependency order
#[derive(Debug, Clone, Default)]
pub struct PlanCommand;

#[async_trait::async_trait]
impl Command for PlanCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let order = orchestrator.execution_order().await?;
        Ok(json!({ "order": order }))
    }
}

/// Status of each dependency of one task
#[derive(Debug, Clone)]
pub struct DepsCommand {
    pub id: String,
}

#[async_trait::async_trait]
impl Command for DepsCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let dependencies = orchestrator.dependency_status(&self.id).await?;
        let satisfied = dependencies.iter().all(|d| d.is_satisfied());
        Ok(json!({
            "taskId": self.id,
            "satisfied": satisfied,
            "dependencies": to_json(&dependencies)?,
        }))
    }
}

/// Regenerate the index from the task records
#[derive(Debug, Clone, Default)]
pub struct ReindexCommand;

#[async_trait::async_trait]
impl Command for ReindexCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        to_json(&orchestrator.rebuild_index().await?)
    }
}

/// Audit log entries, oldest first
#[derive(Debug, Clone, Default)]
pub struct LogCommand {
    pub task: Option<String>,
    /// Keep only the last `tail` entries
    pub tail: Option<usize>,
}

#[async_trait::async_trait]
impl Command for LogCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let mut entries = orchestrator.audit_entries().await?;
        if let Some(task) = &self.task {
            entries.retain(|e| &e.task_id == task);
        }
        if let Some(tail) = self.tail {
            let skip = entries.len().saturating_sub(tail);
            entries.drain(..skip);
        }
        to_json(&entries)
    }
}

/// Effective configuration after every source is merged
#[derive(Debug, Clone, Default)]
pub struct ConfigCommand {
    /// Save the configuration as TOML here; an existing file is never replaced
    pub write_to: Option<PathBuf>,
}

#[async_trait::async_trait]
impl Command for ConfigCommand {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value> {
        let config = orchestrator.config();
        if let Some(path) = &self.write_to {
            if path.exists() {
                return Err(CliError::invalid_argument(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            std::fs::write(path, config.to_toml()?)?;
            info!("Wrote configuration to {}", path.display());
        }
        to_json(config)
    }
}
