//! Composition tests for the resilience wrappers
//!
//! Retry inside a breaker counts as one breaker call; a breaker inside a
//! retry loop is never retried once open.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge_resilience::{
    with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryConfig, Retryable,
};
use taskforge_storage::{IoOperation, ManualClock, StorageError};

fn interrupted() -> StorageError {
    StorageError::io_error(
        "tasks/index.json".into(),
        IoOperation::Write,
        io::Error::new(io::ErrorKind::Interrupted, "interrupted"),
    )
}

fn retry_config() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(100))
        .with_backoff_multiplier(2.0)
}

fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
    CircuitBreaker::new(
        "index-write",
        CircuitBreakerConfig::new()
            .with_failure_threshold(2)
            .with_timeout(Duration::from_secs(30))
            .with_success_threshold(1),
        clock,
    )
}

#[tokio::test(start_paused = true)]
async fn test_retries_inside_breaker_count_once() {
    let breaker = breaker(Arc::new(ManualClock::starting_now()));
    let calls = AtomicU32::new(0);
    let config = retry_config();

    let result = breaker
        .execute(|| {
            with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(interrupted()) }
                },
                &config,
            )
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Operation(StorageError::IoError { .. }))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_is_not_retried() {
    let clock = Arc::new(ManualClock::starting_now());
    let breaker = breaker(clock.clone());
    let calls = AtomicU32::new(0);
    let single = RetryConfig::new().with_max_attempts(1);

    for _ in 0..2 {
        let _ = with_retry(
            || {
                breaker.execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(interrupted()) }
                })
            },
            &single,
        )
        .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let result = with_retry(
        || {
            breaker.execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), StorageError>(()) }
            })
        },
        &retry_config(),
    )
    .await;
    let err = result.unwrap_err();
    assert!(err.is_open());
    assert_eq!(err.error_code(), Some("CIRCUIT_OPEN"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.advance(Duration::from_secs(30));
    breaker
        .execute(|| async { Ok::<(), StorageError>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}
