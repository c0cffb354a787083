//! Circuit breaker for fallible operations
//!
//! Keeps a repeatedly failing operation (an automated heal step, a flaky
//! store) from being hammered. State lives in memory only and is reset when
//! the process restarts.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use taskforge_storage::Clock;
use tracing::{debug, info, warn};

use crate::error::{CircuitBreakerError, CircuitOpenError};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through, failures are counted
    Closed,
    /// Calls fail fast without invoking the operation
    Open,
    /// Trial calls decide whether to close again
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is let through
    pub timeout: Duration,
    /// Consecutive trial successes required to close
    pub success_threshold: u32,
    /// Number of failure messages kept for diagnostics
    pub history_limit: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
            history_limit: 20,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

/// A failed call recorded by the breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    history: VecDeque<FailureRecord>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            trial_in_flight: false,
            history: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Clears the half-open trial slot even if the call future is dropped
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.admission == Admission::Trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Circuit breaker guarding one named operation
///
/// # Usage
///
/// ```ignore
/// let breaker = CircuitBreaker::new("heal", CircuitBreakerConfig::default(), clock);
/// let output = breaker.execute(|| run_heal_step()).await?;
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    /// Name of the protected operation
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state; an OPEN breaker only moves to HALF_OPEN when a call is attempted
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Most recent failures, oldest first
    pub fn failure_history(&self) -> Vec<FailureRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Run `operation` through the breaker
    ///
    /// Fails fast with [`CircuitBreakerError::Open`] while the circuit is open
    /// (the operation is not invoked). Otherwise the operation's result is
    /// returned as is, with its error wrapped in
    /// [`CircuitBreakerError::Operation`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = self.admit().map_err(CircuitBreakerError::Open)?;
        let _slot = TrialSlot {
            breaker: self,
            admission,
        };

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(e.to_string());
                Err(CircuitBreakerError::Operation(e))
            }
        }
    }

    /// Like [`execute`](Self::execute) but returns the caller's own error type
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + From<CircuitOpenError>,
    {
        self.execute(operation).await.map_err(CircuitBreakerError::flatten)
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .and_then(|at| self.clock.now().signed_duration_since(at).to_std().ok())
                    .unwrap_or(Duration::ZERO);

                if elapsed < self.config.timeout {
                    debug!("Circuit breaker {} is open, failing fast", self.name);
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: self.config.timeout - elapsed,
                    });
                }

                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.trial_in_flight = true;
                info!("Circuit breaker {} transitioning to HALF_OPEN", self.name);
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // One trial at a time
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    "Circuit breaker {} HALF_OPEN success {}/{}",
                    self.name, inner.success_count, self.config.success_threshold
                );

                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!("Circuit breaker {} recovered, transitioning to CLOSED", self.name);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!("Circuit breaker {} ignoring late success while OPEN", self.name);
            }
        }
    }

    fn record_failure(&self, message: String) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.history.push_back(FailureRecord { at: now, message });
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                debug!(
                    "Circuit breaker {} failure {}/{}",
                    self.name, inner.failure_count, self.config.failure_threshold
                );

                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(now);
                    warn!(
                        "Circuit breaker {} opened after {} failures",
                        self.name, inner.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                warn!("Circuit breaker {} reopened after failed trial", self.name);
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }
}

/// Breakers keyed by operation name, owned by the service that uses them
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Get the breaker for `name`, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                name,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> =
            self.breakers.read().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.read().keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
