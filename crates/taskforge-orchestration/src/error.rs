//! Error types for task orchestration

use std::fmt;

use serde::Serialize;
use taskforge_resilience::{CircuitOpenError, Retryable};
use taskforge_storage::StorageError;
use thiserror::Error;

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Stable, machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidStateTransition,
    DependencyNotMet,
    CircuitOpen,
    ValidationError,
    FileSystemError,
    ParseError,
    BatchFailed,
    DependencyCycle,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::DependencyNotMet => "DEPENDENCY_NOT_MET",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::FileSystemError => "FILE_SYSTEM_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::BatchFailed => "BATCH_FAILED",
            ErrorCode::DependencyCycle => "DEPENDENCY_CYCLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during orchestration
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Workflow state not found")]
    StateNotFound,

    #[error("Task already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Invalid state transition for {subject}: {from} -> {to}")]
    InvalidStateTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("Task {id} has unmet dependencies: {}", unmet.join(", "))]
    DependencyNotMet { id: String, unmet: Vec<String> },

    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Batch failed at operation {index} ({action} {task_id}): {source}; restored {restored} task(s)")]
    BatchFailed {
        index: usize,
        action: String,
        task_id: String,
        #[source]
        source: Box<OrchestratorError>,
        restored: usize,
        rollback_failures: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<String>, message: impl fmt::Display) -> Self {
        OrchestratorError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn transition(
        subject: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        OrchestratorError::InvalidStateTransition {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::TaskNotFound { .. } | OrchestratorError::StateNotFound => {
                ErrorCode::NotFound
            }
            OrchestratorError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            OrchestratorError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            OrchestratorError::DependencyNotMet { .. } => ErrorCode::DependencyNotMet,
            OrchestratorError::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            OrchestratorError::CircuitOpen(_) => ErrorCode::CircuitOpen,
            OrchestratorError::Validation { .. } | OrchestratorError::Config(_) => {
                ErrorCode::ValidationError
            }
            OrchestratorError::Storage(_) => ErrorCode::FileSystemError,
            OrchestratorError::Parse { .. } => ErrorCode::ParseError,
            OrchestratorError::BatchFailed { .. } => ErrorCode::BatchFailed,
        }
    }

    /// Whether the caller can reasonably wait and try again
    pub fn is_recoverable(&self) -> bool {
        match self {
            OrchestratorError::DependencyNotMet { .. } | OrchestratorError::CircuitOpen(_) => true,
            OrchestratorError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Suggested next action, if there is an obvious one
    pub fn suggestion(&self) -> Option<String> {
        match self {
            OrchestratorError::TaskNotFound { .. } => {
                Some("List tasks to see valid ids: taskforge list".to_string())
            }
            OrchestratorError::StateNotFound => {
                Some("Initialize the workflow first: taskforge init".to_string())
            }
            OrchestratorError::AlreadyExists { id } => Some(format!(
                "Choose a different id or inspect the existing task: taskforge get {}",
                id
            )),
            OrchestratorError::InvalidStateTransition { .. } => {
                Some("Check the current status: taskforge state / taskforge get <id>".to_string())
            }
            OrchestratorError::DependencyNotMet { unmet, .. } => Some(format!(
                "Complete the dependencies first ({}) or run: taskforge next",
                unmet.join(", ")
            )),
            OrchestratorError::DependencyCycle { .. } => {
                Some("Remove one of the dependencies in the cycle".to_string())
            }
            OrchestratorError::CircuitOpen(open) => Some(format!(
                "Wait {}ms before retrying '{}'",
                open.retry_after.as_millis(),
                open.name
            )),
            OrchestratorError::Validation { .. } => None,
            OrchestratorError::Storage(_) => {
                Some("Check that the workspace directory is writable".to_string())
            }
            OrchestratorError::Parse { .. } => {
                Some("Fix the document by hand, then run: taskforge reindex".to_string())
            }
            OrchestratorError::BatchFailed { .. } => {
                Some("No changes were kept; fix the failing operation and rerun the batch".to_string())
            }
            OrchestratorError::Config(_) => {
                Some("Check taskforge.toml and TASKFORGE_* environment variables".to_string())
            }
        }
    }

    /// Message for humans: code, description and suggestion
    pub fn user_message(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("[{}] {}\n\n{}", self.code(), self, suggestion),
            None => format!("[{}] {}", self.code(), self),
        }
    }
}

impl Retryable for OrchestratorError {
    fn error_code(&self) -> Option<&str> {
        match self {
            OrchestratorError::Storage(e) if !e.is_transient() => None,
            other => Some(other.code().as_str()),
        }
    }
}

// Undecodable documents are parse failures, not I/O
impl From<StorageError> for OrchestratorError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidEncoding { path, message } => {
                OrchestratorError::parse(path.display().to_string(), message)
            }
            other => OrchestratorError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::parse("json", e)
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(e: config::ConfigError) -> Self {
        OrchestratorError::Config(e.to_string())
    }
}
