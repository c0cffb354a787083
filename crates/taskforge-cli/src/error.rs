// CLI error type

use taskforge_orchestration::OrchestratorError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Invalid input: {0:#}")]
    Input(#[from] anyhow::Error),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CliError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CliError::Orchestrator(e) => e.user_message(),
            CliError::InvalidArgument { message } => {
                format!(
                    "Invalid argument: {}\n\nRun 'taskforge --help' for usage information.",
                    message
                )
            }
            CliError::Input(e) => format!("Invalid input: {:#}", e),
            CliError::Output(e) => format!("Failed to render output: {}", e),
            CliError::Io(e) => format!("File operation failed: {}", e),
        }
    }

    /// Get technical details for verbose mode
    pub fn technical_details(&self) -> String {
        format!("{:?}", self)
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_errors_keep_their_code() {
        let err: CliError = OrchestratorError::TaskNotFound {
            id: "auth.login".into(),
        }
        .into();
        assert!(err.user_message().starts_with("[NOT_FOUND]"));
    }

    #[test]
    fn test_invalid_argument_points_to_help() {
        let err = CliError::invalid_argument("--limit needs --offset");
        assert!(err.user_message().contains("taskforge --help"));
    }

    #[test]
    fn test_input_error_shows_context_chain() {
        let source = anyhow::anyhow!("expected value at line 1").context("reading ops.json");
        let err = CliError::from(source);
        assert_eq!(
            err.user_message(),
            "Invalid input: reading ops.json: expected value at line 1"
        );
    }
}
