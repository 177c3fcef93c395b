// End-to-end tests for the resilience guard

use relayguard::backoff::BackoffPolicy;
use relayguard::breaker::{CircuitBreakerConfig, CircuitState};
use relayguard::config::Config;
use relayguard::dlq::{DeadLetterQueue, EntryStatus, InMemoryDlqStorage};
use relayguard::guard::ProtectedCallError;
use relayguard::notify::{AdminNotifier, NotificationChannel, NotificationEvent, Severity};
use relayguard::{RelayGuardError, ResilienceGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod guard_tests {
    use super::*;

    struct RecordingChannel {
        events: Arc<Mutex<Vec<NotificationEvent>>>,
    }

    #[async_trait::async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, event: &NotificationEvent) -> relayguard::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct TestHarness {
        guard: ResilienceGuard,
        events: Arc<Mutex<Vec<NotificationEvent>>>,
    }

    fn create_harness() -> TestHarness {
        let events = Arc::new(Mutex::new(Vec::new()));
        let channel = RecordingChannel {
            events: events.clone(),
        };

        let notifier_settings = relayguard::config::NotifierSettings {
            channels: Vec::new(),
            redis_url: None,
            topic: None,
            throttle_period_secs: 300,
            send_timeout_ms: 500,
            queue_capacity: 16,
        };
        let notifier = Arc::new(AdminNotifier::start(
            vec![Arc::new(channel)],
            &notifier_settings,
            "test-app".to_string(),
        ));

        let dlq = Arc::new(DeadLetterQueue::new(
            Arc::new(InMemoryDlqStorage::new()),
            3,
            Duration::from_secs(300),
        ));

        let backoff = BackoffPolicy::new()
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false);

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_probes: 1,
        };

        TestHarness {
            guard: ResilienceGuard::new(breaker_config, backoff, dlq, notifier),
            events,
        }
    }

    fn counting_failure(
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = relayguard::Result<()>> + Send>,
    > {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelayGuardError::Timeout("dependency down".to_string()))
            })
        }
    }

    #[tokio::test]
    async fn test_success_records_one_breaker_success() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result = harness
            .guard
            .protected_call("sms_api", serde_json::json!({"n": 1}), move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RelayGuardError>("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = harness.guard.registry().all_stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].consecutive_successes, 1);
        assert_eq!(stats[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_and_notifies() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));

        let payload = serde_json::json!({"to": "+15551234", "body": "hello"});
        let result = harness
            .guard
            .protected_call("sms_api", payload, counting_failure(&calls))
            .await;

        // max_retries = 5: six invocations, then exhaustion
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        match result {
            Err(ProtectedCallError::RetryExhausted {
                dependency,
                attempts,
                ..
            }) => {
                assert_eq!(dependency, "sms_api");
                assert_eq!(attempts, 6);
            }
            other => panic!("expected RetryExhausted, got {:?}", other.err()),
        }

        // The whole retry burst counts as one breaker failure
        let stats = harness.guard.registry().all_stats().await;
        assert_eq!(stats[0].consecutive_failures, 1);
        assert_eq!(stats[0].state, CircuitState::Closed);

        // Exactly one DLQ entry, pending reprocessing
        let dlq_stats = harness.guard.dlq().statistics().await.unwrap();
        assert_eq!(dlq_stats.total_entries, 1);
        assert_eq!(dlq_stats.entries_by_status.get("pending"), Some(&1));

        let entries = harness.guard.dlq().receive(10).await.unwrap();
        assert_eq!(entries[0].dependency, "sms_api");
        assert_eq!(entries[0].payload["to"], "+15551234");
        assert_eq!(entries[0].error.kind, "timeout");

        // Exactly one error notification carrying the DLQ reference
        harness.guard.notifier().shutdown().await;
        let events = harness.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(
            events[0].error_type.as_deref(),
            Some("retry_exhausted:sms_api")
        );
        assert_eq!(events[0].details["attempts"], 6);
        assert_eq!(events[0].details["dlq_entry_id"], entries[0].id);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking() {
        let harness = create_harness();

        let breaker = harness
            .guard
            .registry()
            .get_or_create(
                "sms_api",
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    recovery_timeout: Duration::from_secs(60),
                    success_threshold: 1,
                    half_open_max_probes: 1,
                },
            )
            .await;
        breaker.force_state(CircuitState::Open).await;

        let calls = Arc::new(AtomicU32::new(0));
        let result = harness
            .guard
            .protected_call("sms_api", serde_json::json!({}), counting_failure(&calls))
            .await;

        assert!(matches!(
            result,
            Err(ProtectedCallError::CircuitOpen { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Rejected calls never reach the DLQ
        let dlq_stats = harness.guard.dlq().statistics().await.unwrap();
        assert_eq!(dlq_stats.total_entries, 0);

        // One warning notification about the open circuit
        harness.guard.notifier().shutdown().await;
        let events = harness.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(
            events[0].error_type.as_deref(),
            Some("circuit_open:sms_api")
        );
    }

    #[tokio::test]
    async fn test_non_retryable_leaves_breaker_untouched() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<(), _> = harness
            .guard
            .protected_call("sms_api", serde_json::json!({}), move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RelayGuardError::Validation("bad number".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ProtectedCallError::NonRetryable { .. })
        ));

        // An input fault says nothing about dependency health
        let stats = harness.guard.registry().all_stats().await;
        assert_eq!(stats[0].consecutive_failures, 0);
        assert_eq!(stats[0].consecutive_successes, 0);

        let dlq_stats = harness.guard.dlq().statistics().await.unwrap();
        assert_eq!(dlq_stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_cancellation_records_nothing() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let policy = BackoffPolicy::new()
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false);

        let result = harness
            .guard
            .protected_call_with(
                "sms_api",
                serde_json::json!({}),
                &policy,
                &cancel,
                counting_failure(&calls),
            )
            .await;

        assert!(matches!(result, Err(ProtectedCallError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let stats = harness.guard.registry().all_stats().await;
        assert_eq!(stats[0].consecutive_failures, 0);
        assert_eq!(stats[0].consecutive_successes, 0);

        let dlq_stats = harness.guard.dlq().statistics().await.unwrap();
        assert_eq!(dlq_stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_repeated_exhaustion_opens_circuit() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));

        // Five exhausted calls reach the failure threshold
        for _ in 0..5 {
            let _ = harness
                .guard
                .protected_call("sms_api", serde_json::json!({}), counting_failure(&calls))
                .await;
        }

        let stats = harness.guard.registry().all_stats().await;
        assert_eq!(stats[0].state, CircuitState::Open);

        // The sixth call is rejected outright
        let before = calls.load(Ordering::SeqCst);
        let result = harness
            .guard
            .protected_call("sms_api", serde_json::json!({}), counting_failure(&calls))
            .await;
        assert!(matches!(
            result,
            Err(ProtectedCallError::CircuitOpen { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_oversized_payload_snapshot_truncated() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));

        let big = "x".repeat(2000);
        let _ = harness
            .guard
            .protected_call(
                "sms_api",
                serde_json::json!({ "body": big }),
                counting_failure(&calls),
            )
            .await;

        harness.guard.notifier().shutdown().await;
        let events = harness.events.lock().unwrap();
        assert_eq!(events.len(), 1);

        let snapshot = events[0].details["payload_snapshot"].as_str().unwrap();
        assert!(snapshot.ends_with("... (truncated)"));
        assert!(snapshot.len() < 600);
    }

    #[tokio::test]
    async fn test_from_config_defaults() {
        let config = Config::default();
        let guard = ResilienceGuard::from_config(&config).unwrap();

        let result = guard
            .protected_call("sms_api", serde_json::json!({}), || async {
                Ok::<_, RelayGuardError>(1)
            })
            .await;
        assert_eq!(result.unwrap(), 1);

        guard.notifier().shutdown().await;
    }

    #[tokio::test]
    async fn test_dependencies_are_isolated() {
        let harness = create_harness();
        let calls = Arc::new(AtomicU32::new(0));

        // Open the circuit for one dependency only
        for _ in 0..5 {
            let _ = harness
                .guard
                .protected_call("sms_api", serde_json::json!({}), counting_failure(&calls))
                .await;
        }

        // Another dependency is unaffected
        let result = harness
            .guard
            .protected_call("email_api", serde_json::json!({}), || async {
                Ok::<_, RelayGuardError>("fine")
            })
            .await;
        assert_eq!(result.unwrap(), "fine");
    }
}
