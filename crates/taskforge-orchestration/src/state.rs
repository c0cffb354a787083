//! Workflow state (`state.json`)
//!
//! A single record per workspace tracks the phase, the task being worked on,
//! the PRD payload and an append-only error log. Updates are validated in
//! full before anything is written, so a rejected update leaves the record
//! untouched.

use std::sync::Arc;

use serde::Serialize;
use taskforge_storage::{Clock, DurableStore};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{ErrorRecord, Phase, StateUpdate, WorkflowState};
use crate::saga::Saga;

/// Storage path of the workflow state
pub const STATE_PATH: &str = "state.json";

/// Directory that holds archived sessions
pub const ARCHIVE_DIR: &str = "archive";

// Directories archived along with the state
const SESSION_DIRS: [&str; 2] = ["tasks", "logs"];

/// Result of clearing the workflow state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClearOutcome {
    Cleared { existed: bool },
    /// The session is not complete and the clear was not forced
    Blocked { phase: Phase },
}

/// Result of archiving a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived { directory: String, files: Vec<String> },
    /// The session is not complete and the archive was not forced
    Blocked { phase: Phase },
}

/// Manages the workflow state record
pub struct StateManager {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current state, `None` before initialization
    pub async fn get(&self) -> OrchestratorResult<Option<WorkflowState>> {
        let _lock = self.store.lock().await?;
        self.load().await
    }

    /// Create the state in `phase` (default `clarify`); an existing state is returned as is
    pub async fn initialize(&self, phase: Option<Phase>) -> OrchestratorResult<WorkflowState> {
        let _lock = self.store.lock().await?;
        if let Some(existing) = self.load().await? {
            warn!(
                "Workflow state already initialized (phase {}); leaving it unchanged",
                existing.phase
            );
            return Ok(existing);
        }

        let state = WorkflowState::new(phase.unwrap_or_default(), self.clock.now());
        self.write(&state).await?;
        info!("Initialized workflow state in phase {}", state.phase);
        Ok(state)
    }

    /// Apply a partial update as one write
    pub async fn update(&self, update: StateUpdate) -> OrchestratorResult<WorkflowState> {
        let _lock = self.store.lock().await?;
        let mut state = self.load().await?.ok_or(OrchestratorError::StateNotFound)?;

        if let Some(next) = update.phase {
            if next != state.phase && !state.phase.can_transition_to(next) {
                return Err(OrchestratorError::transition("workflow", state.phase, next));
            }
        }
        if let (Some(current), Some(incoming)) = (&state.prd, &update.prd) {
            if current != incoming {
                return Err(OrchestratorError::transition("prd", "set", "replaced"));
            }
        }
        if let Some(error) = update.errors.iter().find(|e| e.message.trim().is_empty()) {
            let subject = error.task_id.as_deref().unwrap_or("workflow");
            return Err(OrchestratorError::validation(
                "errors",
                format!("error message for {} must not be empty", subject),
            ));
        }

        let now = self.clock.now();
        if let Some(next) = update.phase {
            if next != state.phase {
                info!("Workflow phase {} -> {}", state.phase, next);
                state.phase = next;
            }
        }
        if let Some(current) = update.current_task {
            state.current_task = current;
        }
        if update.prd.is_some() && state.prd.is_none() {
            state.prd = update.prd;
        }
        for error in update.errors {
            state.errors.push(ErrorRecord {
                timestamp: now,
                phase: state.phase,
                message: error.message,
                task_id: error.task_id,
                code: error.code,
            });
        }
        state.updated_at = now;

        self.write(&state).await?;
        Ok(state)
    }

    /// Point the state at a started task
    pub async fn on_task_started(&self, task_id: &str) -> OrchestratorResult<()> {
        self.modify(|state| {
            state.current_task = Some(task_id.to_string());
            true
        })
        .await
    }

    /// Clear the current task if it was `task_id`
    pub async fn on_task_completed(&self, task_id: &str) -> OrchestratorResult<()> {
        self.modify(|state| {
            if state.current_task.as_deref() == Some(task_id) {
                state.current_task = None;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Log a task failure in the error list
    pub async fn on_task_failed(&self, task_id: &str, reason: &str) -> OrchestratorResult<()> {
        let now = self.clock.now();
        self.modify(|state| {
            state.errors.push(ErrorRecord {
                timestamp: now,
                phase: state.phase,
                message: reason.to_string(),
                task_id: Some(task_id.to_string()),
                code: None,
            });
            true
        })
        .await
    }

    /// Put back a captured state; `None` removes the record
    pub async fn restore(&self, snapshot: Option<&WorkflowState>) -> OrchestratorResult<()> {
        let _lock = self.store.lock().await?;
        match snapshot {
            Some(state) => self.write(state).await,
            None => Ok(self.store.remove(STATE_PATH).await?),
        }
    }

    /// Remove the state; refused before `complete` unless forced
    pub async fn clear(&self, force: bool) -> OrchestratorResult<ClearOutcome> {
        let _lock = self.store.lock().await?;
        let Some(state) = self.load().await? else {
            return Ok(ClearOutcome::Cleared { existed: false });
        };
        if state.phase != Phase::Complete && !force {
            return Ok(ClearOutcome::Blocked { phase: state.phase });
        }

        self.store.remove(STATE_PATH).await?;
        info!("Cleared workflow state (phase {})", state.phase);
        Ok(ClearOutcome::Cleared { existed: true })
    }

    /// Move the session into `archive/<timestamp>/`
    ///
    /// The session is `state.json` plus everything under `tasks/` and
    /// `logs/`; other files under the workspace root are never touched. The
    /// files are copied, then removed from the live workspace. A failed copy
    /// removes the partial archive and leaves the session untouched.
    pub async fn archive(&self, force: bool) -> OrchestratorResult<ArchiveOutcome> {
        let _lock = self.store.lock().await?;
        match self.load().await? {
            Some(state) if state.phase != Phase::Complete && !force => {
                return Ok(ArchiveOutcome::Blocked { phase: state.phase });
            }
            None if !force => return Err(OrchestratorError::StateNotFound),
            _ => {}
        }

        let mut files = Vec::new();
        if self.store.exists(STATE_PATH).await? {
            files.push(STATE_PATH.to_string());
        }
        for dir in SESSION_DIRS {
            files.extend(self.store.list(dir).await?);
        }
        files.sort();
        let directory = self.archive_directory().await?;

        let store = self.store.as_ref();
        let (files_ref, dir_ref) = (&files, directory.as_str());
        let saga = Saga::<OrchestratorError>::new("archive")
            .step(
                "copy session",
                move || async move {
                    for path in files_ref {
                        store.copy(path, &format!("{}/{}", dir_ref, path)).await?;
                    }
                    Ok::<(), OrchestratorError>(())
                },
                move || async move { Ok::<(), OrchestratorError>(store.remove(dir_ref).await?) },
            )
            .final_step("clear session", move || async move {
                for path in files_ref {
                    store.remove(path).await?;
                }
                Ok::<(), OrchestratorError>(())
            });

        saga.run().await.map_err(|e| {
            for (step, failure) in &e.compensation_failures {
                warn!("Archive cleanup '{}' failed: {}", step, failure);
            }
            e.into_source()
        })?;

        info!("Archived {} file(s) to {}", files.len(), directory);
        Ok(ArchiveOutcome::Archived { directory, files })
    }

    // Callers below hold the workspace lock

    async fn archive_directory(&self) -> OrchestratorResult<String> {
        let base = format!("{}/{}", ARCHIVE_DIR, self.clock.now().format("%Y%m%d-%H%M%S"));
        let mut candidate = base.clone();
        let mut suffix = 1;
        while !self.store.list(&candidate).await?.is_empty() {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        Ok(candidate)
    }

    async fn modify<F>(&self, change: F) -> OrchestratorResult<()>
    where
        F: FnOnce(&mut WorkflowState) -> bool,
    {
        let _lock = self.store.lock().await?;
        let Some(mut state) = self.load().await? else {
            debug!("No workflow state; skipping task side effect");
            return Ok(());
        };
        if change(&mut state) {
            state.updated_at = self.clock.now();
            self.write(&state).await?;
        }
        Ok(())
    }

    async fn load(&self) -> OrchestratorResult<Option<WorkflowState>> {
        match self.store.read_optional(STATE_PATH).await? {
            Some(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| OrchestratorError::parse(STATE_PATH, e)),
            None => Ok(None),
        }
    }

    async fn write(&self, state: &WorkflowState) -> OrchestratorResult<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| OrchestratorError::parse(STATE_PATH, e))?;
        self.store.write(STATE_PATH, &json).await?;
        Ok(())
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager").field("path", &STATE_PATH).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewError;
    use serde_json::json;
    use std::time::Duration;
    use taskforge_storage::{ManualClock, MemoryStore};

    fn manager() -> (MemoryStore, Arc<ManualClock>, StateManager) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_now());
        let manager = StateManager::new(Arc::new(store.clone()), clock.clone());
        (store, clock, manager)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_store, clock, manager) = manager();
        assert_eq!(manager.get().await.unwrap(), None);

        let first = manager.initialize(Some(Phase::Breakdown)).await.unwrap();
        assert_eq!(first.phase, Phase::Breakdown);

        clock.advance(Duration::from_secs(5));
        let second = manager.initialize(None).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_update_requires_state() {
        let (_store, _clock, manager) = manager();
        let err = manager.update(StateUpdate::phase(Phase::Breakdown)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StateNotFound));
    }

    #[tokio::test]
    async fn test_update_applies_every_field() {
        let (_store, clock, manager) = manager();
        let initial = manager.initialize(None).await.unwrap();
        clock.advance(Duration::from_secs(60));

        let state = manager
            .update(
                StateUpdate::phase(Phase::Breakdown)
                    .with_current_task(Some("auth.login".into()))
                    .with_prd(json!({"goal": "login"}))
                    .with_error(NewError::new("flaky").for_task("auth.login")),
            )
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Breakdown);
        assert_eq!(state.current_task.as_deref(), Some("auth.login"));
        assert_eq!(state.prd, Some(json!({"goal": "login"})));
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].phase, Phase::Breakdown);
        assert_eq!(state.started_at, initial.started_at);
        assert!(state.updated_at > initial.updated_at);
        assert_eq!(manager.get().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_rejected_update_changes_nothing() {
        let (_store, _clock, manager) = manager();
        let initial = manager.initialize(None).await.unwrap();

        let err = manager
            .update(
                StateUpdate::phase(Phase::Deliver).with_error(NewError::new("should not land")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));

        let err = manager
            .update(StateUpdate::default().with_error(NewError::new("  ")))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));

        assert_eq!(manager.get().await.unwrap(), Some(initial));
    }

    #[tokio::test]
    async fn test_heal_loop_and_self_transition() {
        let (_store, _clock, manager) = manager();
        manager.initialize(Some(Phase::Implement)).await.unwrap();

        manager.update(StateUpdate::phase(Phase::Heal)).await.unwrap();
        let err = manager.update(StateUpdate::phase(Phase::Deliver)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));

        manager.update(StateUpdate::phase(Phase::Implement)).await.unwrap();
        let state = manager.update(StateUpdate::phase(Phase::Implement)).await.unwrap();
        assert_eq!(state.phase, Phase::Implement);
    }

    #[tokio::test]
    async fn test_prd_is_set_once() {
        let (_store, _clock, manager) = manager();
        manager.initialize(None).await.unwrap();

        manager.update(StateUpdate::default().with_prd(json!("v1"))).await.unwrap();
        manager.update(StateUpdate::default().with_prd(json!("v1"))).await.unwrap();
        let err = manager
            .update(StateUpdate::default().with_prd(json!("v2")))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_task_side_effects() {
        let (_store, _clock, manager) = manager();
        // No state yet: side effects are skipped
        manager.on_task_started("a.one").await.unwrap();
        assert_eq!(manager.get().await.unwrap(), None);

        manager.initialize(Some(Phase::Implement)).await.unwrap();
        manager.on_task_started("a.one").await.unwrap();
        assert_eq!(
            manager.get().await.unwrap().unwrap().current_task.as_deref(),
            Some("a.one")
        );

        manager.on_task_completed("b.two").await.unwrap();
        assert!(manager.get().await.unwrap().unwrap().current_task.is_some());

        manager.on_task_failed("a.one", "tests red").await.unwrap();
        manager.on_task_completed("a.one").await.unwrap();
        let state = manager.get().await.unwrap().unwrap();
        assert_eq!(state.current_task, None);
        assert_eq!(state.errors[0].task_id.as_deref(), Some("a.one"));
        assert_eq!(state.errors[0].message, "tests red");
    }

    #[tokio::test]
    async fn test_clear_is_gated_on_complete() {
        let (store, _clock, manager) = manager();
        assert_eq!(
            manager.clear(false).await.unwrap(),
            ClearOutcome::Cleared { existed: false }
        );

        manager.initialize(Some(Phase::Deliver)).await.unwrap();
        assert_eq!(
            manager.clear(false).await.unwrap(),
            ClearOutcome::Blocked {
                phase: Phase::Deliver
            }
        );
        assert!(store.exists(STATE_PATH).await.unwrap());

        assert_eq!(
            manager.clear(true).await.unwrap(),
            ClearOutcome::Cleared { existed: true }
        );
        assert!(!store.exists(STATE_PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_archive_moves_session() {
        let (store, _clock, manager) = manager();
        manager.initialize(Some(Phase::Deliver)).await.unwrap();
        manager.update(StateUpdate::phase(Phase::Complete)).await.unwrap();
        store.write("tasks/index.json", "{}").await.unwrap();
        store.write("logs/tasks.log", "line\n").await.unwrap();

        let outcome = manager.archive(false).await.unwrap();
        let ArchiveOutcome::Archived { directory, files } = outcome else {
            panic!("expected the session to be archived");
        };
        assert!(directory.starts_with("archive/"));
        assert_eq!(files, vec!["logs/tasks.log", STATE_PATH, "tasks/index.json"]);

        assert!(!store.exists(STATE_PATH).await.unwrap());
        assert_eq!(
            store.read(&format!("{}/logs/tasks.log", directory)).await.unwrap(),
            "line\n"
        );

        // A second archive in the same second gets its own directory
        manager.initialize(Some(Phase::Complete)).await.unwrap();
        let ArchiveOutcome::Archived { directory: second, files } =
            manager.archive(false).await.unwrap()
        else {
            panic!("expected the session to be archived");
        };
        assert_eq!(second, format!("{}-1", directory));
        assert_eq!(files, vec![STATE_PATH]);
    }

    #[tokio::test]
    async fn test_archive_leaves_other_files_alone() {
        let (store, _clock, manager) = manager();
        manager.initialize(Some(Phase::Complete)).await.unwrap();
        store.write("tasks/a/a.one.md", "---\n").await.unwrap();
        store.write(".git/HEAD", "ref: refs/heads/main\n").await.unwrap();
        store.write("Cargo.toml", "[package]\n").await.unwrap();
        store.write("tasksheet.txt", "notes\n").await.unwrap();

        let ArchiveOutcome::Archived { files, .. } = manager.archive(false).await.unwrap() else {
            panic!("expected the session to be archived");
        };
        assert_eq!(files, vec![STATE_PATH, "tasks/a/a.one.md"]);

        assert!(store.exists(".git/HEAD").await.unwrap());
        assert!(store.exists("Cargo.toml").await.unwrap());
        assert!(store.exists("tasksheet.txt").await.unwrap());
        assert!(!store.exists("tasks/a/a.one.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_archive_gates() {
        let (_store, _clock, manager) = manager();
        assert!(matches!(
            manager.archive(false).await,
            Err(OrchestratorError::StateNotFound)
        ));

        manager.initialize(None).await.unwrap();
        assert_eq!(
            manager.archive(false).await.unwrap(),
            ArchiveOutcome::Blocked {
                phase: Phase::Clarify
            }
        );
        assert!(matches!(
            manager.archive(true).await.unwrap(),
            ArchiveOutcome::Archived { .. }
        ));
    }

    #[tokio::test]
    async fn test_restore_round_trips() {
        let (store, _clock, manager) = manager();
        let snapshot = manager.initialize(None).await.unwrap();
        manager.update(StateUpdate::phase(Phase::Breakdown)).await.unwrap();

        manager.restore(Some(&snapshot)).await.unwrap();
        assert_eq!(manager.get().await.unwrap(), Some(snapshot));

        manager.restore(None).await.unwrap();
        assert!(!store.exists(STATE_PATH).await.unwrap());
    }
}
