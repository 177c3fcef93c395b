// Unit tests for retry with exponential backoff

use relayguard::backoff::{self, BackoffPolicy, RetryError, Retryable};
use relayguard::RelayGuardError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod backoff_tests {
    use super::*;

    fn fast_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy::new()
            .with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(10))
            .with_jitter(false)
    }

    fn transient_error() -> RelayGuardError {
        RelayGuardError::Timeout("dependency timed out".to_string())
    }

    #[test]
    fn test_delay_sequence() {
        let policy = BackoffPolicy::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_multiplier(2.0);

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));

        // 32s exceeds the cap
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_monotonic_up_to_cap() {
        let policy = BackoffPolicy::new()
            .with_base_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(60))
            .with_multiplier(1.5);

        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(transient_error().is_retryable());
        assert!(RelayGuardError::RateLimited("429".to_string()).is_retryable());
        assert!(RelayGuardError::Redis("connection dropped".to_string()).is_retryable());
        assert!(RelayGuardError::Dependency("connection refused".to_string()).is_retryable());

        assert!(!RelayGuardError::Validation("bad input".to_string()).is_retryable());
        assert!(!RelayGuardError::Config("missing key".to_string()).is_retryable());
        assert!(!RelayGuardError::Dependency("404 not found".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let policy = fast_policy(5);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result = backoff::run(&policy, "first_try", &cancel, move || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RelayGuardError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = fast_policy(5);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result = backoff::run(&policy, "eventual", &cancel, move || {
            let calls = calls_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient_error())
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_invokes_max_retries_plus_one() {
        let policy = fast_policy(5);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<(), _> = backoff::run(&policy, "exhausted", &cancel, move || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient_error())
            }
        })
        .await;

        // max_retries = 5 means six invocations in total
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 6);
                assert!(matches!(source, RelayGuardError::Timeout(_)));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let policy = fast_policy(5);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<(), _> = backoff::run(&policy, "fatal", &cancel, move || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelayGuardError::Validation("malformed payload".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn test_custom_retryable_predicate() {
        let policy = fast_policy(3);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        // Treat everything as fatal regardless of the error kind
        let result: Result<(), _> = backoff::run_with(
            &policy,
            "custom",
            &cancel,
            move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                }
            },
            |_| false,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let policy = fast_policy(5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<(), _> = backoff::run(&policy, "pre_cancelled", &cancel, move || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        // Long delays so the loop is parked in its backoff sleep
        let policy = BackoffPolicy::new()
            .with_max_retries(3)
            .with_base_delay(Duration::from_secs(30))
            .with_jitter(false);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let result: Result<(), _> = tokio::time::timeout(
            Duration::from_secs(5),
            backoff::run(&policy, "mid_cancel", &cancel, move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                }
            }),
        )
        .await
        .expect("cancellation should interrupt the backoff sleep");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
