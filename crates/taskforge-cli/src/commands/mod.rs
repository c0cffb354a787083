// Command handlers for the taskforge CLI

pub mod batch;
pub mod reports;
pub mod tasks;
pub mod workflow;

pub use batch::BatchCommand;
pub use reports::{
    ConfigCommand, DepsCommand, LogCommand, PlanCommand, ReindexCommand, SummaryCommand,
};
pub use tasks::{
    CreateCommand, GetCommand, ListCommand, NextCommand, NoteCommand, TransitionCommand,
};
pub use workflow::{ArchiveCommand, ClearCommand, InitCommand, StateCommand, UpdateCommand};

use serde_json::Value;
use taskforge_orchestration::Orchestrator;

use crate::error::CliResult;

/// Trait for command handlers
///
/// Handlers return the JSON document the router prints.
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, orchestrator: &Orchestrator) -> CliResult<Value>;
}
