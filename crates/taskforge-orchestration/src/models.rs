//! Core data models for tasks and workflow state

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrchestratorError::validation("status", format!("unknown status '{}'", s)))
    }
}

/// Test requirement attached to a task; opaque to scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequirement {
    pub required: bool,
    pub pattern: String,
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Dot-namespaced id, e.g. `auth.login`
    pub id: String,
    /// Grouping key and storage partition
    pub module: String,
    /// Lower runs earlier
    pub priority: i64,
    pub status: TaskStatus,
    pub estimated_minutes: u32,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    /// Append-only free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Ids that must be completed first; may name tasks that do not exist yet
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub test_requirements: BTreeMap<String, TestRequirement>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New pending task with priority 1
    pub fn new(id: impl Into<String>, module: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            priority: 1,
            status: TaskStatus::Pending,
            estimated_minutes: 0,
            description: description.into(),
            acceptance_criteria: Vec::new(),
            notes: None,
            dependencies: Vec::new(),
            test_requirements: BTreeMap::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_minutes(mut self, minutes: u32) -> Self {
        self.estimated_minutes = minutes;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_acceptance_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_test_requirement(
        mut self,
        name: impl Into<String>,
        required: bool,
        pattern: impl Into<String>,
    ) -> Self {
        self.test_requirements.insert(
            name.into(),
            TestRequirement {
                required,
                pattern: pattern.into(),
            },
        );
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Append a line to the notes section, keeping earlier notes intact
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim_end_matches('\n');
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, note),
            _ => note.to_string(),
        });
    }

    /// Check the fields that the storage format depends on
    pub fn validate(&self) -> OrchestratorResult<()> {
        validate_identifier("id", &self.id, true)?;
        validate_identifier("module", &self.module, false)?;

        if self.description.trim().is_empty() {
            return Err(OrchestratorError::validation("description", "must not be empty"));
        }
        if self.description.contains('\n') || self.description.trim() != self.description {
            return Err(OrchestratorError::validation(
                "description",
                "must be a single line without surrounding whitespace",
            ));
        }
        if self.acceptance_criteria.iter().any(|c| c.contains('\n')) {
            return Err(OrchestratorError::validation(
                "acceptanceCriteria",
                "each criterion must be a single line",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for dependency in &self.dependencies {
            validate_identifier("dependencies", dependency, true)?;
            if !seen.insert(dependency.as_str()) {
                return Err(OrchestratorError::validation(
                    "dependencies",
                    format!("duplicate dependency '{}'", dependency),
                ));
            }
        }
        Ok(())
    }
}

fn validate_identifier(field: &str, value: &str, dotted: bool) -> OrchestratorResult<()> {
    if value.is_empty() {
        return Err(OrchestratorError::validation(field, "must not be empty"));
    }
    let segment_ok = |segment: &str| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    let valid = if dotted {
        value.split('.').all(segment_ok)
    } else {
        segment_ok(value)
    };
    if !valid {
        return Err(OrchestratorError::validation(
            field,
            format!("'{}' may only contain letters, digits, '_', '-' and '.' separators", value),
        ));
    }
    Ok(())
}

/// Workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Clarify,
    Breakdown,
    Implement,
    Heal,
    Deliver,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Clarify,
        Phase::Breakdown,
        Phase::Implement,
        Phase::Heal,
        Phase::Deliver,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Clarify => "clarify",
            Phase::Breakdown => "breakdown",
            Phase::Implement => "implement",
            Phase::Heal => "heal",
            Phase::Deliver => "deliver",
            Phase::Complete => "complete",
        }
    }

    /// Phases reachable in one step
    pub fn successors(&self) -> &'static [Phase] {
        match self {
            Phase::Clarify => &[Phase::Breakdown],
            Phase::Breakdown => &[Phase::Implement],
            Phase::Implement => &[Phase::Heal, Phase::Deliver],
            Phase::Heal => &[Phase::Implement],
            Phase::Deliver => &[Phase::Complete],
            Phase::Complete => &[],
        }
    }

    pub fn can_transition_to(&self, next: Phase) -> bool {
        self.successors().contains(&next)
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Clarify
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| OrchestratorError::validation("phase", format!("unknown phase '{}'", s)))
    }
}

/// One entry in the workflow error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Error to append through a state update; timestamp and phase are filled in
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewError {
    pub message: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl NewError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// The single workflow record of a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub phase: Phase,
    /// Weak reference; the task may no longer exist
    pub current_task: Option<String>,
    pub prd: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(phase: Phase, now: DateTime<Utc>) -> Self {
        Self {
            phase,
            current_task: None,
            prd: None,
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by `update_state`
///
/// `current_task: Some(None)` clears the current task.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default, deserialize_with = "double_option")]
    pub current_task: Option<Option<String>>,
    #[serde(default)]
    pub prd: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<NewError>,
}

impl StateUpdate {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn with_current_task(mut self, task: Option<String>) -> Self {
        self.current_task = Some(task);
        self
    }

    pub fn with_prd(mut self, prd: serde_json::Value) -> Self {
        self.prd = Some(prd);
        self
    }

    pub fn with_error(mut self, error: NewError) -> Self {
        self.errors.push(error);
        self
    }
}

// Distinguishes an explicit `null` (clear) from an absent key (keep)
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Per-status counts for progress reporting
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub percent_complete: f64,
}

impl TaskSummary {
    pub fn from_statuses<I: IntoIterator<Item = TaskStatus>>(statuses: I) -> Self {
        let mut summary = TaskSummary::default();
        for status in statuses {
            summary.total += 1;
            match status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Blocked => summary.blocked += 1,
            }
        }
        if summary.total > 0 {
            let percent = summary.completed as f64 * 100.0 / summary.total as f64;
            summary.percent_complete = (percent * 10.0).round() / 10.0;
        }
        summary
    }
}
