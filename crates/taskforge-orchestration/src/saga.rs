//! Ordered steps with compensations
//!
//! Steps run in order. When one fails, the compensations of the steps that
//! already completed run in reverse order and the original failure is
//! returned together with any compensation failures.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, error, warn};

/// Boxed future returned by saga actions
pub type StepFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;

type Action<'a, E> = Box<dyn FnOnce() -> StepFuture<'a, E> + Send + 'a>;

/// One step of a saga
pub struct SagaStep<'a, E> {
    name: String,
    apply: Action<'a, E>,
    compensate: Option<Action<'a, E>>,
}

impl<'a, E> SagaStep<'a, E> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Steps that completed before the saga finished
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SagaReport {
    pub completed: Vec<String>,
}

/// Failure of a saga step, after compensation
#[derive(Debug)]
pub struct SagaError<E> {
    pub failed_step: String,
    pub source: E,
    /// Steps whose compensation ran successfully, in the order they ran
    pub compensated: Vec<String>,
    pub compensation_failures: Vec<(String, E)>,
}

impl<E> SagaError<E> {
    /// Whether every completed step was undone
    pub fn fully_compensated(&self) -> bool {
        self.compensation_failures.is_empty()
    }

    pub fn into_source(self) -> E {
        self.source
    }
}

impl<E: fmt::Display> fmt::Display for SagaError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step '{}' failed: {}", self.failed_step, self.source)?;
        if !self.compensation_failures.is_empty() {
            let names: Vec<&str> = self
                .compensation_failures
                .iter()
                .map(|(name, _)| name.as_str())
                .collect();
            write!(f, " (compensation failed for: {})", names.join(", "))?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for SagaError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Runner for an ordered list of [`SagaStep`]s
pub struct Saga<'a, E> {
    name: String,
    steps: Vec<SagaStep<'a, E>>,
}

impl<'a, E> Saga<'a, E>
where
    E: fmt::Display + Send + 'a,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step with a compensation
    pub fn step<A, AF, C, CF>(mut self, name: impl Into<String>, apply: A, compensate: C) -> Self
    where
        A: FnOnce() -> AF + Send + 'a,
        AF: Future<Output = Result<(), E>> + Send + 'a,
        C: FnOnce() -> CF + Send + 'a,
        CF: Future<Output = Result<(), E>> + Send + 'a,
    {
        self.steps.push(SagaStep {
            name: name.into(),
            apply: Box::new(move || Box::pin(apply()) as StepFuture<'a, E>),
            compensate: Some(Box::new(move || Box::pin(compensate()) as StepFuture<'a, E>)),
        });
        self
    }

    /// Add a step that has nothing to undo
    pub fn final_step<A, AF>(mut self, name: impl Into<String>, apply: A) -> Self
    where
        A: FnOnce() -> AF + Send + 'a,
        AF: Future<Output = Result<(), E>> + Send + 'a,
    {
        self.steps.push(SagaStep {
            name: name.into(),
            apply: Box::new(move || Box::pin(apply()) as StepFuture<'a, E>),
            compensate: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step, compensating in reverse order on the first failure
    pub async fn run(self) -> Result<SagaReport, SagaError<E>> {
        let saga = self.name;
        let mut done: Vec<(String, Option<Action<'a, E>>)> = Vec::new();

        for step in self.steps {
            debug!("Saga '{}': running step '{}'", saga, step.name);
            match (step.apply)().await {
                Ok(()) => done.push((step.name, step.compensate)),
                Err(source) => {
                    warn!("Saga '{}': step '{}' failed: {}", saga, step.name, source);
                    let mut compensated = Vec::new();
                    let mut compensation_failures = Vec::new();

                    for (name, compensate) in done.into_iter().rev() {
                        let Some(compensate) = compensate else {
                            continue;
                        };
                        match compensate().await {
                            Ok(()) => compensated.push(name),
                            Err(e) => {
                                error!("Saga '{}': compensation of '{}' failed: {}", saga, name, e);
                                compensation_failures.push((name, e));
                            }
                        }
                    }

                    return Err(SagaError {
                        failed_step: step.name,
                        source,
                        compensated,
                        compensation_failures,
                    });
                }
            }
        }

        Ok(SagaReport {
            completed: done.into_iter().map(|(name, _)| name).collect(),
        })
    }
}

impl<'a, E> fmt::Debug for Saga<'a, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field("steps", &steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn push(log: &Mutex<Vec<String>>, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let log = Mutex::new(Vec::new());
        let log = &log;
        let report = Saga::<String>::new("ok")
            .step(
                "one",
                move || async move { push(log, "apply one"); Ok(()) },
                move || async move { push(log, "undo one"); Ok(()) },
            )
            .final_step("two", move || async move { push(log, "apply two"); Ok(()) })
            .run()
            .await
            .unwrap();

        assert_eq!(report.completed, vec!["one", "two"]);
        assert_eq!(*log.lock().unwrap(), vec!["apply one", "apply two"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse() {
        let log = Mutex::new(Vec::new());
        let log = &log;
        let err = Saga::<String>::new("rollback")
            .step(
                "one",
                move || async move { push(log, "apply one"); Ok(()) },
                move || async move { push(log, "undo one"); Ok(()) },
            )
            .step(
                "two",
                move || async move { push(log, "apply two"); Ok(()) },
                move || async move { push(log, "undo two"); Ok(()) },
            )
            .step(
                "three",
                || async { Err("disk full".to_string()) },
                move || async move { push(log, "undo three"); Ok(()) },
            )
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.failed_step, "three");
        assert_eq!(err.source, "disk full");
        assert_eq!(err.compensated, vec!["two", "one"]);
        assert!(err.fully_compensated());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["apply one", "apply two", "undo two", "undo one"]
        );
    }

    #[tokio::test]
    async fn test_compensation_failures_are_collected() {
        let err = Saga::<String>::new("partial")
            .step("one", || async { Ok(()) }, || async { Err("stuck".to_string()) })
            .final_step("two", || async { Err("boom".to_string()) })
            .run()
            .await
            .unwrap_err();

        assert!(!err.fully_compensated());
        assert_eq!(err.compensation_failures, vec![("one".to_string(), "stuck".to_string())]);
        assert_eq!(err.to_string(), "Step 'two' failed: boom (compensation failed for: one)");
    }
}
