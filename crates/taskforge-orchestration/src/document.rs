//! Task record documents
//!
//! A task is stored as markdown with YAML frontmatter:
//!
//! ```text
//! ---
//! id: auth.login
//! module: auth
//! priority: 1
//! status: pending
//! estimatedMinutes: 30
//! dependencies:
//! - setup.init
//! testRequirements: {}
//! ---
//!
//! # Implement login
//!
//! ## Acceptance Criteria
//!
//! 1. Valid credentials return a session
//!
//! ## Notes
//!
//! free text, appended to over time
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{Task, TaskStatus, TestRequirement};

const DELIMITER: &str = "---";
const CRITERIA_HEADING: &str = "## Acceptance Criteria";
const NOTES_HEADING: &str = "## Notes";

/// Structured header of a task document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frontmatter {
    id: String,
    module: String,
    priority: i64,
    status: TaskStatus,
    #[serde(default)]
    estimated_minutes: u32,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    test_requirements: BTreeMap<String, TestRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

/// Storage path of a task record relative to the store root
pub fn task_path(module: &str, id: &str) -> String {
    format!("tasks/{}/{}.md", module, id)
}

/// Render a task as a markdown document
pub fn render(task: &Task) -> OrchestratorResult<String> {
    let frontmatter = Frontmatter {
        id: task.id.clone(),
        module: task.module.clone(),
        priority: task.priority,
        status: task.status,
        estimated_minutes: task.estimated_minutes,
        dependencies: task.dependencies.clone(),
        test_requirements: task.test_requirements.clone(),
        started_at: task.started_at,
        completed_at: task.completed_at,
    };
    let yaml = serde_yaml::to_string(&frontmatter)
        .map_err(|e| OrchestratorError::parse(task_path(&task.module, &task.id), e))?;

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push_str("\n\n# ");
    out.push_str(&task.description);
    out.push_str("\n\n");
    out.push_str(CRITERIA_HEADING);
    out.push('\n');
    if !task.acceptance_criteria.is_empty() {
        out.push('\n');
        for (i, criterion) in task.acceptance_criteria.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, criterion));
        }
    }
    if let Some(notes) = &task.notes {
        out.push('\n');
        out.push_str(NOTES_HEADING);
        out.push_str("\n\n");
        out.push_str(notes);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a task document; `path` is only used in error messages
pub fn parse(path: &str, content: &str) -> OrchestratorResult<Task> {
    let content = content.replace("\r\n", "\n");
    let rest = content
        .strip_prefix("---\n")
        .ok_or_else(|| OrchestratorError::parse(path, "missing frontmatter"))?;

    let (yaml, body) = match rest.find("\n---\n") {
        Some(pos) => (&rest[..pos + 1], &rest[pos + 5..]),
        None => match rest.strip_suffix("\n---") {
            Some(yaml) => (yaml, ""),
            None => return Err(OrchestratorError::parse(path, "unclosed frontmatter")),
        },
    };

    let header: Frontmatter =
        serde_yaml::from_str(yaml).map_err(|e| OrchestratorError::parse(path, e))?;

    let (sections, notes) = match body.find(&format!("\n{}\n", NOTES_HEADING)) {
        Some(pos) => {
            let raw = &body[pos + NOTES_HEADING.len() + 2..];
            let raw = raw.strip_prefix('\n').unwrap_or(raw);
            let raw = raw.strip_suffix('\n').unwrap_or(raw);
            (&body[..pos + 1], Some(raw.to_string()))
        }
        None => (body, None),
    };

    let mut description = None;
    let mut acceptance_criteria = Vec::new();
    let mut in_criteria = false;

    for line in sections.lines() {
        if line == CRITERIA_HEADING {
            in_criteria = true;
        } else if let Some(title) = line.strip_prefix("# ") {
            if description.is_none() {
                description = Some(title.to_string());
            }
        } else if in_criteria {
            if let Some(criterion) = strip_list_number(line) {
                acceptance_criteria.push(criterion.to_string());
            }
        }
    }

    let description =
        description.ok_or_else(|| OrchestratorError::parse(path, "missing title line"))?;

    Ok(Task {
        id: header.id,
        module: header.module,
        priority: header.priority,
        status: header.status,
        estimated_minutes: header.estimated_minutes,
        description,
        acceptance_criteria,
        notes,
        dependencies: header.dependencies,
        test_requirements: header.test_requirements,
        started_at: header.started_at,
        completed_at: header.completed_at,
    })
}

fn strip_list_number(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ").or_else(|| {
        // "3." with an empty criterion
        (&line[digits..] == ".").then_some("")
    })
}
