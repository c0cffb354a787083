//! Denormalized task index (`tasks/index.json`)
//!
//! The index keeps one entry per task in creation order. That order is the
//! tie-breaker the scheduler uses between equal priorities, so the `tasks`
//! map is read and written as an ordered list of pairs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::task_path;
use crate::models::{Task, TaskStatus};

/// Storage path of the index
pub const INDEX_PATH: &str = "tasks/index.json";

/// Current index format version
pub const INDEX_VERSION: &str = "1.0";

/// Index entry for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub status: TaskStatus,
    pub priority: i64,
    pub module: String,
    pub description: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl From<&Task> for IndexEntry {
    fn from(task: &Task) -> Self {
        Self {
            status: task.status,
            priority: task.priority,
            module: task.module.clone(),
            description: task.description.clone(),
            file_path: task_path(&task.module, &task.id),
            dependencies: task.dependencies.clone(),
        }
    }
}

/// Free-form project metadata carried by the index
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    #[serde(default)]
    pub project_goal: Option<String>,
    #[serde(default)]
    pub language_config: Option<serde_json::Value>,
}

/// The task index document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIndex {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: IndexMetadata,
    #[serde(with = "ordered_entries")]
    tasks: Vec<(String, IndexEntry)>,
}

impl TaskIndex {
    pub fn new(metadata: IndexMetadata, now: DateTime<Utc>) -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            updated_at: now,
            metadata,
            tasks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.tasks.iter().find(|(key, _)| key == id).map(|(_, entry)| entry)
    }

    /// Status of `id`, `None` when the task is unknown
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|entry| entry.status)
    }

    /// Entries in creation order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.tasks.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Insert or replace an entry; new ids go to the end
    pub fn upsert(&mut self, id: &str, entry: IndexEntry) {
        match self.position(id) {
            Some(pos) => self.tasks[pos].1 = entry,
            None => self.tasks.push((id.to_string(), entry)),
        }
    }

    /// Whether every dependency of `id` exists and is completed
    pub fn is_ready(&self, entry: &IndexEntry) -> bool {
        entry
            .dependencies
            .iter()
            .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
    }

    /// Dependencies of `entry` that are missing or not completed
    pub fn unmet_dependencies(&self, entry: &IndexEntry) -> Vec<String> {
        entry
            .dependencies
            .iter()
            .filter(|dep| self.status_of(dep) != Some(TaskStatus::Completed))
            .cloned()
            .collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|(key, _)| key == id)
    }
}

/// Serializes `Vec<(String, IndexEntry)>` as a JSON object, keeping order
mod ordered_entries {
    use super::*;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(entries: &[(String, IndexEntry)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (id, entry) in entries {
            map.serialize_entry(id, entry)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, IndexEntry)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Vec<(String, IndexEntry)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of task ids to index entries")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, IndexEntry)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, entry)) = access.next_entry::<String, IndexEntry>()? {
                    // Last duplicate wins, first position is kept
                    match entries.iter_mut().find(|(key, _)| *key == id) {
                        Some(existing) => existing.1 = entry,
                        None => entries.push((id, entry)),
                    }
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
