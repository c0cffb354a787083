//! Shared fixtures for the cross-crate scenario tests in `tests/`

use std::path::Path;
use std::sync::Arc;

use taskforge_orchestration::{Orchestrator, Task, TaskforgeConfig};
use taskforge_storage::{Clock, FsStore, ManualClock};

/// Configuration with retry delays removed so scenarios run instantly
pub fn fast_config(root: &Path) -> TaskforgeConfig {
    let mut config = TaskforgeConfig::default();
    config.workspace.root = root.to_path_buf();
    config.retry.initial_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.timeout_ms = 60_000;
    config.circuit_breaker.success_threshold = 1;
    config
}

/// Orchestrator over a locked filesystem workspace at `root`
pub fn orchestrator_at(root: &Path, clock: Arc<dyn Clock>) -> Orchestrator {
    let config = fast_config(root);
    let store = FsStore::with_locking(root, config.locking.enabled);
    Orchestrator::new(Arc::new(store), clock, config)
}

/// Orchestrator with a manual clock, returned alongside it
pub fn orchestrator_with_clock(root: &Path) -> (Orchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    (orchestrator_at(root, clock.clone()), clock)
}

/// Three-module plan: setup, then auth and db in parallel, then api on both
pub fn sample_plan() -> Vec<Task> {
    vec![
        Task::new("setup.init", "setup", "Initialize project").with_estimated_minutes(10),
        Task::new("auth.login", "auth", "Implement login")
            .with_dependencies(["setup.init"])
            .with_acceptance_criteria(["Valid credentials return a session"]),
        Task::new("db.schema", "db", "Create schema")
            .with_priority(0)
            .with_dependencies(["setup.init"]),
        Task::new("api.routes", "api", "Expose routes")
            .with_priority(2)
            .with_dependencies(["auth.login", "db.schema"]),
    ]
}
