//! Task audit log (`logs/tasks.log`)
//!
//! One line per mutation: `<rfc3339> <ACTION> <task id>[ - note]`.
//! Writing the log never fails the mutation that triggered it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskforge_storage::{Clock, DurableStore};
use tracing::warn;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Storage path of the audit log
pub const AUDIT_LOG_PATH: &str = "logs/tasks.log";

/// Audited task mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Started,
    Completed,
    Failed,
    Updated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::Started => "STARTED",
            AuditAction::Completed => "COMPLETED",
            AuditAction::Failed => "FAILED",
            AuditAction::Updated => "UPDATED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(AuditAction::Created),
            "STARTED" => Ok(AuditAction::Started),
            "COMPLETED" => Ok(AuditAction::Completed),
            "FAILED" => Ok(AuditAction::Failed),
            "UPDATED" => Ok(AuditAction::Updated),
            other => Err(OrchestratorError::parse(
                AUDIT_LOG_PATH,
                format!("unknown action '{}'", other),
            )),
        }
    }
}

/// Parsed audit log line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditEntry {
    fn to_line(&self) -> String {
        match &self.note {
            Some(note) => format!(
                "{} {} {} - {}\n",
                self.timestamp.to_rfc3339(),
                self.action,
                self.task_id,
                note.replace('\n', " ")
            ),
            None => format!("{} {} {}\n", self.timestamp.to_rfc3339(), self.action, self.task_id),
        }
    }

    fn parse_line(line: &str) -> OrchestratorResult<Self> {
        let mut parts = line.splitn(4, ' ');
        let (Some(ts), Some(action), Some(task_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(OrchestratorError::parse(AUDIT_LOG_PATH, format!("malformed line '{}'", line)));
        };
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| OrchestratorError::parse(AUDIT_LOG_PATH, e))?
            .with_timezone(&Utc);
        let note = parts
            .next()
            .map(|rest| rest.strip_prefix("- ").unwrap_or(rest).to_string());

        Ok(Self {
            timestamp,
            action: action.parse()?,
            task_id: task_id.to_string(),
            note,
        })
    }
}

/// Appends audit lines to the durable store
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a mutation; failures are logged and swallowed
    pub async fn record(&self, action: AuditAction, task_id: &str, note: Option<&str>) {
        let entry = AuditEntry {
            timestamp: self.clock.now(),
            action,
            task_id: task_id.to_string(),
            note: note.map(str::to_string),
        };

        if let Err(e) = self.store.append(AUDIT_LOG_PATH, &entry.to_line()).await {
            warn!("Failed to write audit log entry for {}: {}", task_id, e);
        }
    }

    /// All entries in write order; malformed lines are skipped with a warning
    pub async fn entries(&self) -> OrchestratorResult<Vec<AuditEntry>> {
        let Some(content) = self.store.read_optional(AUDIT_LOG_PATH).await? else {
            return Ok(Vec::new());
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match AuditEntry::parse_line(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping audit line: {}", e);
                    None
                }
            })
            .collect())
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").field("path", &AUDIT_LOG_PATH).finish()
    }
}
