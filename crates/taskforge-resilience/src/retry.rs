//! Retry with exponential backoff
//!
//! Only errors whose code is listed in [`RetryConfig::retryable_error_codes`]
//! are retried. The error returned after the last attempt is the operation's
//! own error, never a wrapper.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use taskforge_storage::StorageError;
use tracing::{debug, warn};

use crate::error::{CircuitBreakerError, CircuitOpenError};

/// Errors that expose a stable code for retry classification
pub trait Retryable {
    /// Stable error code, if the error has one
    fn error_code(&self) -> Option<&str>;
}

impl Retryable for StorageError {
    fn error_code(&self) -> Option<&str> {
        if self.is_transient() {
            Some("FILE_SYSTEM_ERROR")
        } else {
            None
        }
    }
}

impl Retryable for CircuitOpenError {
    fn error_code(&self) -> Option<&str> {
        Some("CIRCUIT_OPEN")
    }
}

impl<E: Retryable> Retryable for CircuitBreakerError<E> {
    fn error_code(&self) -> Option<&str> {
        match self {
            CircuitBreakerError::Open(open) => open.error_code(),
            CircuitBreakerError::Operation(e) => e.error_code(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retries
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Error codes that may be retried
    pub retryable_error_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            retryable_error_codes: vec!["FILE_SYSTEM_ERROR".to_string()],
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_retryable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether an error with `code` may be retried
    pub fn is_retryable(&self, code: Option<&str>) -> bool {
        match code {
            Some(code) => self.retryable_error_codes.iter().any(|c| c == code),
            None => false,
        }
    }

    /// Delay that follows `current`: `min(current * multiplier, max_delay)`
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_nanos() as f64 * self.backoff_multiplier;
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        if scaled <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(scaled.round() as u64)
    }

    /// Sleeps taken between attempts when every attempt fails
    pub fn delay_schedule(&self) -> Vec<Duration> {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        let mut delays = Vec::with_capacity(retries);
        let mut delay = self.initial_delay;
        for _ in 0..retries {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }
}

/// Run `operation`, retrying retryable failures with backoff
///
/// A `max_attempts` of zero is treated as one.
pub async fn with_retry<F, Fut, T, E>(mut operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts || !config.is_retryable(e.error_code()) {
                    return Err(e);
                }

                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

/// Reusable retry policy around a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        with_retry(operation, &self.config).await
    }
}
