//! Dependency graph analysis
//!
//! Edges point from a task to the tasks it depends on. Dependencies on ids
//! that are not in the graph are ignored here; they simply never become
//! satisfied.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::ser::SerializeStruct;
use serde::Serialize;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::index::TaskIndex;
use crate::models::TaskStatus;

/// Dependency graph over task ids, preserving index order
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph over every task in the index
    pub fn from_index(index: &TaskIndex) -> Self {
        Self::from_index_filtered(index, |_| true)
    }

    /// Graph over the tasks with `status`
    pub fn from_index_with_status(index: &TaskIndex, status: TaskStatus) -> Self {
        Self::from_index_filtered(index, |s| s == status)
    }

    fn from_index_filtered(index: &TaskIndex, keep: impl Fn(TaskStatus) -> bool) -> Self {
        let mut graph = Self::new();
        for (id, entry) in index.entries() {
            if keep(entry.status) {
                graph.add(id, entry.dependencies.iter().cloned());
            }
        }
        graph
    }

    /// Add a node or replace its edges
    pub fn add(&mut self, id: &str, dependencies: impl IntoIterator<Item = String>) {
        if !self.edges.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.edges.insert(id.to_string(), dependencies.into_iter().collect());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// First cycle found, as a path that starts and ends on the same id
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut finished = HashSet::new();
        for start in &self.order {
            if finished.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(cycle) = self.dfs(start, &mut path, &mut on_path, &mut finished) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        id: &str,
        path: &mut Vec<String>,
        on_path: &mut HashSet<String>,
        finished: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        path.push(id.to_string());
        on_path.insert(id.to_string());

        for dep in self.edges.get(id).into_iter().flatten() {
            if !self.contains(dep) || finished.contains(dep) {
                continue;
            }
            if on_path.contains(dep) {
                let start = path.iter().position(|p| p == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if let Some(cycle) = self.dfs(dep, path, on_path, finished) {
                return Some(cycle);
            }
        }

        path.pop();
        on_path.remove(id);
        finished.insert(id.to_string());
        None
    }

    /// Cycle passing through `id`, if any of its dependencies lead back to it
    pub fn cycle_through(&self, id: &str) -> Option<Vec<String>> {
        for dep in self.edges.get(id)? {
            if dep == id {
                return Some(vec![id.to_string(), id.to_string()]);
            }
            if let Some(path) = self.path_between(dep, id) {
                let mut cycle = vec![id.to_string()];
                cycle.extend(path);
                return Some(cycle);
            }
        }
        None
    }

    /// Shortest dependency path from `from` to `to`, both ends included
    pub fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) {
            return None;
        }
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to.to_string()];
                let mut node = to;
                while let Some(&prev) = parent.get(node) {
                    path.push(prev.to_string());
                    node = prev;
                }
                path.reverse();
                return Some(path);
            }
            for dep in self.edges.get(current).into_iter().flatten() {
                if self.contains(dep) && seen.insert(dep.as_str()) {
                    parent.insert(dep.as_str(), current);
                    queue.push_back(dep.as_str());
                }
            }
        }
        None
    }

    /// Topological order with dependencies first; ties keep index order
    pub fn execution_order(&self) -> OrchestratorResult<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for id in &self.order {
            let known: Vec<&str> = self.edges[id]
                .iter()
                .filter(|dep| self.contains(dep))
                .map(String::as_str)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            remaining.insert(id.as_str(), known.len());
            for dep in known {
                dependents.entry(dep).or_default().push(id.as_str());
            }
        }

        let position: HashMap<&str, usize> =
            self.order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| remaining[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            let mut unlocked = Vec::new();
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        unlocked.push(*dependent);
                    }
                }
            }
            unlocked.sort_by_key(|id| position[id]);
            queue.extend(unlocked);
        }

        if order.len() != self.order.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(OrchestratorError::DependencyCycle { cycle });
        }
        Ok(order)
    }
}

/// Status of one dependency of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub id: String,
    /// `None` when no task with this id exists
    pub status: Option<TaskStatus>,
}

impl DependencyStatus {
    pub fn is_satisfied(&self) -> bool {
        self.status == Some(TaskStatus::Completed)
    }

    /// Status name, `unknown` for missing tasks
    pub fn label(&self) -> &'static str {
        self.status.map(|s| s.as_str()).unwrap_or("unknown")
    }
}

impl Serialize for DependencyStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DependencyStatus", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("status", self.label())?;
        state.serialize_field("satisfied", &self.is_satisfied())?;
        state.end()
    }
}

/// Per-dependency status of `dependencies` looked up in `index`
pub fn dependency_status(index: &TaskIndex, dependencies: &[String]) -> Vec<DependencyStatus> {
    dependencies
        .iter()
        .map(|id| DependencyStatus {
            id: id.clone(),
            status: index.status_of(id),
        })
        .collect()
}
