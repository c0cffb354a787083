//! Error types for resilience wrappers

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Synthesized by a breaker when it short-circuits a call
///
/// The failure that opened the circuit is kept in the breaker's failure
/// history, not here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit '{name}' is open; retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Breaker (protected operation) name
    pub name: String,
    /// Time left until a trial call is allowed
    pub retry_after: Duration,
}

/// Outcome of a call made through a circuit breaker
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The breaker refused the call; the operation was not invoked
    Open(CircuitOpenError),
    /// The operation ran and failed; the error is returned untouched
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was short-circuited
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open(_))
    }

    /// The operation's own error, if it ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::Operation(e) => Some(e),
            CircuitBreakerError::Open(_) => None,
        }
    }

    /// Collapse into the caller's error type
    pub fn flatten(self) -> E
    where
        E: From<CircuitOpenError>,
    {
        match self {
            CircuitBreakerError::Open(open) => E::from(open),
            CircuitBreakerError::Operation(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open(open) => write!(f, "{}", open),
            CircuitBreakerError::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::Open(_) => None,
            CircuitBreakerError::Operation(e) => e.source(),
        }
    }
}
