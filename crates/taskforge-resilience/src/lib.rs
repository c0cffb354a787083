//! Taskforge Resilience
//!
//! Composable wrappers that protect fallible operations: a circuit breaker
//! that fails fast after repeated failures, and retry with exponential
//! backoff for transient errors. Typical use puts the retry inside the
//! breaker so one outer call counts as at most one breaker failure.

pub mod circuit_breaker;
pub mod error;
pub mod retry;

#[cfg(test)]
mod resilience_properties;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
    FailureRecord,
};
pub use error::{CircuitBreakerError, CircuitOpenError};
pub use retry::{with_retry, RetryConfig, RetryPolicy, Retryable};
