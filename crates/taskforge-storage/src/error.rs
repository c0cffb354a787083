//! Storage error types for Taskforge

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Directory creation failed
    #[error("Directory creation failed for {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File read/write failed
    #[error("IO error on {path} ({operation}): {source}")]
    IoError {
        path: PathBuf,
        operation: IoOperation,
        source: std::io::Error,
    },

    /// Document does not exist
    #[error("Document not found: {path}")]
    NotFound { path: PathBuf },

    /// Document bytes are not valid UTF-8
    #[error("Invalid encoding in {path}: {message}")]
    InvalidEncoding { path: PathBuf, message: String },

    /// Path escapes the store root or is otherwise unusable
    #[error("Invalid store path {path}: {message}")]
    InvalidPath { path: PathBuf, message: String },

    /// Workspace lock could not be acquired
    #[error("Failed to lock workspace at {path}: {message}")]
    LockFailed { path: PathBuf, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// IO operation type for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
    Append,
    Delete,
    List,
    Move,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOperation::Read => write!(f, "read"),
            IoOperation::Write => write!(f, "write"),
            IoOperation::Append => write!(f, "append"),
            IoOperation::Delete => write!(f, "delete"),
            IoOperation::List => write!(f, "list"),
            IoOperation::Move => write!(f, "move"),
        }
    }
}

impl StorageError {
    /// Create a directory creation failed error
    pub fn directory_creation_failed(path: PathBuf, source: std::io::Error) -> Self {
        StorageError::DirectoryCreationFailed { path, source }
    }

    /// Create an IO error
    pub fn io_error(path: PathBuf, operation: IoOperation, source: std::io::Error) -> Self {
        StorageError::IoError {
            path,
            operation,
            source,
        }
    }

    /// Create a not-found error
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        StorageError::NotFound { path: path.into() }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StorageError::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying (transient I/O as opposed to a missing
    /// document or a malformed path)
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::IoError { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidData
            ),
            StorageError::LockFailed { .. } => true,
            _ => false,
        }
    }
}
