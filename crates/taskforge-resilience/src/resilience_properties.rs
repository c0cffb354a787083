//! Property-based tests for the breaker and the retry policy

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use taskforge_storage::ManualClock;

    use crate::{
        with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
        RetryConfig, Retryable,
    };

    #[derive(Debug)]
    struct Coded(&'static str);

    impl std::fmt::Display for Coded {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Retryable for Coded {
        fn error_code(&self) -> Option<&str> {
            Some(self.0)
        }
    }

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_breaker_opens_exactly_at_threshold(threshold in 1u32..10) {
            let clock = Arc::new(ManualClock::starting_now());
            let breaker = CircuitBreaker::new(
                "op",
                CircuitBreakerConfig::new().with_failure_threshold(threshold),
                clock,
            );

            tokio_test::block_on(async {
                for i in 1..=threshold {
                    let _ = breaker.execute(|| async { Err::<(), _>("fail") }).await;
                    let expected = if i < threshold { CircuitState::Closed } else { CircuitState::Open };
                    assert_eq!(breaker.state(), expected);
                }

                let invoked = AtomicU32::new(0);
                let result = breaker
                    .execute(|| async {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, &str>(())
                    })
                    .await;
                assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
                assert_eq!(invoked.load(Ordering::SeqCst), 0);
            });
        }

        #[test]
        fn prop_recovery_requires_success_threshold(
            failure_threshold in 1u32..5,
            success_threshold in 1u32..5,
            timeout_ms in 1u64..10_000,
        ) {
            let clock = Arc::new(ManualClock::starting_now());
            let config = CircuitBreakerConfig::new()
                .with_failure_threshold(failure_threshold)
                .with_success_threshold(success_threshold)
                .with_timeout(Duration::from_millis(timeout_ms));
            let breaker = CircuitBreaker::new("op", config, clock.clone());

            tokio_test::block_on(async {
                for _ in 0..failure_threshold {
                    let _ = breaker.execute(|| async { Err::<(), _>("fail") }).await;
                }
                clock.advance(Duration::from_millis(timeout_ms));

                for i in 1..=success_threshold {
                    breaker.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
                    if i < success_threshold {
                        assert_eq!(breaker.state(), CircuitState::HalfOpen);
                    }
                }
                assert_eq!(breaker.state(), CircuitState::Closed);
                assert_eq!(breaker.failure_count(), 0);
                assert_eq!(breaker.success_count(), 0);
            });
        }

        #[test]
        fn prop_delay_schedule_is_monotonic_and_capped(
            attempts in 1u32..12,
            initial_ms in 0u64..1_000,
            extra_ms in 0u64..10_000,
            multiplier in 1.0f64..4.0,
        ) {
            let config = RetryConfig::new()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(initial_ms + extra_ms))
                .with_backoff_multiplier(multiplier);

            let schedule = config.delay_schedule();
            prop_assert_eq!(schedule.len(), (attempts - 1) as usize);
            for pair in schedule.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in &schedule {
                prop_assert!(*delay <= config.max_delay);
            }
        }

        #[test]
        fn prop_retry_invocations_bounded_by_max_attempts(
            attempts in 1u32..6,
            retryable in any::<bool>(),
        ) {
            let config = RetryConfig::new()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(10))
                .with_retryable_codes(["FILE_SYSTEM_ERROR"]);
            let code = if retryable { "FILE_SYSTEM_ERROR" } else { "VALIDATION_ERROR" };

            let calls = AtomicU32::new(0);
            let result: Result<(), Coded> = paused_runtime().block_on(with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(Coded(code)) }
                },
                &config,
            ));

            prop_assert!(result.is_err());
            let expected = if retryable { attempts } else { 1 };
            prop_assert_eq!(calls.load(Ordering::SeqCst), expected);
        }
    }
}
