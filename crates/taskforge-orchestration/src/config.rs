//! Configuration loading
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. the user config file (`<config dir>/taskforge/config.toml`)
//! 3. the project file (`<project>/taskforge.toml`)
//! 4. `TASKFORGE_*` environment variables, `__` between section and key
//!    (e.g. `TASKFORGE_RETRY__MAX_ATTEMPTS=5`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use taskforge_resilience::{CircuitBreakerConfig, RetryConfig};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::index::IndexMetadata;

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "taskforge.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "TASKFORGE";

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskforgeConfig {
    pub workspace: WorkspaceSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub index: IndexSettings,
    pub locking: LockingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Directory holding tasks, state and logs; relative paths are resolved
    /// against the project directory
    pub root: PathBuf,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".taskforge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_codes: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            retryable_codes: defaults.retryable_error_codes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            timeout_ms: defaults.timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
        }
    }
}

/// Metadata written into a new task index
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingSettings {
    /// Take an OS advisory lock on `<workspace>/.lock` around every write
    pub enabled: bool,
}

impl Default for LockingSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl TaskforgeConfig {
    /// Reject settings the resilience layer cannot work with
    pub fn validate(&self) -> OrchestratorResult<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(OrchestratorError::validation(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::validation(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(OrchestratorError::validation(
                "retry.max_delay_ms",
                "must not be less than retry.initial_delay_ms",
            ));
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(OrchestratorError::validation(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if breaker.success_threshold == 0 {
            return Err(OrchestratorError::validation(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }
        if self.workspace.root.as_os_str().is_empty() {
            return Err(OrchestratorError::validation("workspace.root", "must not be empty"));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.retry.max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_backoff_multiplier(self.retry.backoff_multiplier)
            .with_retryable_codes(self.retry.retryable_codes.iter().cloned())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.circuit_breaker.failure_threshold)
            .with_timeout(Duration::from_millis(self.circuit_breaker.timeout_ms))
            .with_success_threshold(self.circuit_breaker.success_threshold)
    }

    pub fn index_metadata(&self) -> IndexMetadata {
        IndexMetadata {
            project_goal: self.index.project_goal.clone(),
            language_config: self.index.language_config.clone(),
        }
    }

    /// Render as TOML, e.g. to seed a project file
    pub fn to_toml(&self) -> OrchestratorResult<String> {
        toml::to_string_pretty(self).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}

/// Default location of the user configuration file
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskforge").join("config.toml"))
}

/// Builds a [`TaskforgeConfig`] from files and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    user_config: Option<PathBuf>,
    env_prefix: String,
    env_source: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            user_config: default_user_config_path(),
            env_prefix: ENV_PREFIX.to_string(),
            env_source: None,
        }
    }

    /// Override the user config file; `None` skips it
    pub fn with_user_config(mut self, path: Option<PathBuf>) -> Self {
        self.user_config = path;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: config::Map<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn project_config_path(&self) -> PathBuf {
        self.project_dir.join(PROJECT_CONFIG_FILE)
    }

    /// Load, validate and resolve the workspace root
    pub fn load(&self) -> OrchestratorResult<TaskforgeConfig> {
        let mut builder = Config::builder();
        if let Some(user) = &self.user_config {
            builder = builder.add_source(File::from(user.clone()).required(false));
        }
        builder = builder
            .add_source(File::from(self.project_config_path()).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("retry.retryable_codes")
                    .source(self.env_source.clone()),
            );

        let mut loaded: TaskforgeConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;

        if loaded.workspace.root.is_relative() {
            loaded.workspace.root = self.project_dir.join(&loaded.workspace.root);
        }
        tracing::debug!("Loaded configuration; workspace at {:?}", loaded.workspace.root);
        Ok(loaded)
    }
}
