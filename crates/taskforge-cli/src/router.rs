// Command routing and dispatch

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use taskforge_orchestration::{Orchestrator, PROJECT_CONFIG_FILE};
use tracing::debug;

use crate::commands::batch::BatchSource;
use crate::commands::*;
use crate::error::CliResult;
use crate::output;

/// Taskforge - durable task queue and workflow state for multi-phase builds
#[derive(Parser, Debug)]
#[command(name = "taskforge")]
#[command(bin_name = "taskforge")]
#[command(about = "Durable task queue and workflow state for multi-phase builds")]
#[command(
    long_about = "Taskforge keeps a dependency-aware task queue and the workflow phase of a build.\n\nEvery command prints JSON on stdout. Logs go to stderr and honor TASKFORGE_LOG.\n\nQuick start:\n  taskforge init\n  taskforge create setup.init --module setup --description \"Initialize project\"\n  taskforge next\n  taskforge start setup.init\n  taskforge done setup.init"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project directory holding taskforge.toml
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    pub project: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the workflow state if it does not exist yet
    Init {
        /// Starting phase (default: clarify)
        #[arg(long)]
        phase: Option<String>,
    },

    /// Create a pending task
    Create {
        /// Dot-namespaced task id, e.g. auth.login
        id: String,

        #[arg(long)]
        module: String,

        #[arg(long)]
        description: String,

        /// Lower runs earlier (default: 1)
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i64>,

        /// Estimated minutes of work
        #[arg(long)]
        estimate: Option<u32>,

        /// Task that must complete first; repeatable
        #[arg(long = "depends-on", value_name = "ID")]
        depends_on: Vec<String>,

        /// Acceptance criterion; repeatable
        #[arg(long = "criterion", value_name = "TEXT")]
        criteria: Vec<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show a task
    Get { id: String },

    /// List tasks
    List {
        /// pending, in_progress, completed, failed or blocked
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        module: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i64>,

        /// Only pending tasks whose dependencies are completed
        #[arg(long)]
        ready: bool,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,

        /// priority, status or estimatedMinutes
        #[arg(long)]
        sort: Option<String>,
    },

    /// Pick the next ready task
    Next,

    /// Mark a task in progress
    Start { id: String },

    /// Mark a task completed
    Done { id: String },

    /// Mark a task failed
    Fail {
        id: String,

        #[arg(long, default_value = "Marked failed from the command line")]
        reason: String,
    },

    /// Append a note to a task
    Note { id: String, text: String },

    /// Apply transitions from a JSON file ('-' for stdin)
    Batch {
        #[arg(value_name = "FILE")]
        file: String,

        /// Roll everything back if one operation fails
        #[arg(long)]
        atomic: bool,
    },

    /// Show the workflow state
    State,

    /// Update the workflow state
    Update {
        #[arg(long)]
        phase: Option<String>,

        #[arg(long = "current-task", value_name = "ID")]
        current_task: Option<String>,

        #[arg(long = "clear-current-task")]
        clear_current_task: bool,

        /// Product requirements; JSON or plain text
        #[arg(long)]
        prd: Option<String>,

        /// Error message to record; repeatable
        #[arg(long = "error", value_name = "MESSAGE")]
        errors: Vec<String>,

        /// Task the recorded errors belong to
        #[arg(long = "error-task", value_name = "ID")]
        error_task: Option<String>,
    },

    /// Remove the workflow state
    Clear {
        /// Clear even when the workflow is not complete
        #[arg(long)]
        force: bool,
    },

    /// Archive the session and start fresh
    Archive {
        /// Archive even when the workflow is not complete
        #[arg(long)]
        force: bool,
    },

    /// Task counts per status
    Summary,

    /// Tasks in dependency order
    Plan,

    /// Dependency status of a task
    Deps { id: String },

    /// Rebuild the index from task records
    Reindex,

    /// Show the audit log
    Log {
        #[arg(long)]
        task: Option<String>,

        #[arg(long)]
        tail: Option<usize>,
    },

    /// Show the effective configuration
    Config {
        /// Also save it as the project's taskforge.toml
        #[arg(long)]
        write: bool,
    },
}

impl Commands {
    /// Handler for this subcommand run against the project at `project`
    pub fn handler(&self, project: &Path) -> Box<dyn Command> {
        match self.clone() {
            Commands::Init { phase } => Box::new(InitCommand { phase }),
            Commands::Create {
                id,
                module,
                description,
                priority,
                estimate,
                depends_on,
                criteria,
                notes,
            } => Box::new(
                CreateCommand::new(id, module, description)
                    .with_priority(priority)
                    .with_estimate(estimate)
                    .with_dependencies(depends_on)
                    .with_criteria(criteria)
                    .with_notes(notes),
            ),
            Commands::Get { id } => Box::new(GetCommand::new(id)),
            Commands::List {
                status,
                module,
                priority,
                ready,
                offset,
                limit,
                sort,
            } => Box::new(ListCommand {
                status,
                module,
                priority,
                ready,
                offset,
                limit,
                sort,
            }),
            Commands::Next => Box::new(NextCommand),
            Commands::Start { id } => Box::new(TransitionCommand::Start { id }),
            Commands::Done { id } => Box::new(TransitionCommand::Done { id }),
            Commands::Fail { id, reason } => Box::new(TransitionCommand::Fail { id, reason }),
            Commands::Note { id, text } => Box::new(NoteCommand { id, note: text }),
            Commands::Batch { file, atomic } => {
                Box::new(BatchCommand::new(BatchSource::from_arg(&file), atomic))
            }
            Commands::State => Box::new(StateCommand),
            Commands::Update {
                phase,
                current_task,
                clear_current_task,
                prd,
                errors,
                error_task,
            } => Box::new(UpdateCommand {
                phase,
                current_task,
                clear_current_task,
                prd,
                errors,
                error_task,
            }),
            Commands::Clear { force } => Box::new(ClearCommand { force }),
            Commands::Archive { force } => Box::new(ArchiveCommand { force }),
            Commands::Summary => Box::new(SummaryCommand),
            Commands::Plan => Box::new(PlanCommand),
            Commands::Deps { id } => Box::new(DepsCommand { id }),
            Commands::Reindex => Box::new(ReindexCommand),
            Commands::Log { task, tail } => Box::new(LogCommand { task, tail }),
            Commands::Config { write } => Box::new(ConfigCommand {
                write_to: write.then(|| project.join(PROJECT_CONFIG_FILE)),
            }),
        }
    }
}

/// Command router
pub struct CommandRouter;

impl CommandRouter {
    /// Parse CLI arguments, run the command and print its result
    pub async fn route() -> CliResult<()> {
        let cli = Cli::parse();
        crate::logging::init_logging(cli.verbose, cli.quiet);

        let result = Self::execute(&cli).await?;
        output::print_json(&result)
    }

    /// Open the project's workspace and run the command against it
    pub async fn execute(cli: &Cli) -> CliResult<Value> {
        let orchestrator = Orchestrator::from_project(&cli.project)?;
        Self::dispatch(&orchestrator, &cli.command, &cli.project).await
    }

    pub async fn dispatch(
        orchestrator: &Orchestrator,
        command: &Commands,
        project: &Path,
    ) -> CliResult<Value> {
        debug!("Running {:?}", command);
        command.handler(project).execute(orchestrator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "taskforge",
            "create",
            "auth.login",
            "--module",
            "auth",
            "--description",
            "Implement login",
            "--priority",
            "-1",
            "--depends-on",
            "setup.init",
            "--depends-on",
            "db.schema",
        ])
        .unwrap();

        match cli.command {
            Commands::Create {
                id,
                priority,
                depends_on,
                ..
            } => {
                assert_eq!(id, "auth.login");
                assert_eq!(priority, Some(-1));
                assert_eq!(depends_on, vec!["setup.init", "db.schema"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["taskforge", "next", "--project", "/tmp/p", "-v"]).unwrap();
        assert_eq!(cli.project, PathBuf::from("/tmp/p"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Next));
    }

    #[test]
    fn test_fail_has_default_reason() {
        let cli = Cli::try_parse_from(["taskforge", "fail", "a.one"]).unwrap();
        match cli.command {
            Commands::Fail { reason, .. } => assert!(!reason.is_empty()),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
