use crate::backoff::{self, BackoffPolicy, RetryError};
use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::config::Config;
use crate::dlq::{self, DeadLetterQueue, ErrorInfo};
use crate::error::RelayGuardError;
use crate::notify::{build_channels, AdminNotifier, Severity};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Longest payload snapshot attached to a notification
const PAYLOAD_SNAPSHOT_LIMIT: usize = 512;

/// Terminal outcome of a protected call. The underlying failure is
/// preserved as the error source where one exists.
#[derive(Debug, thiserror::Error)]
pub enum ProtectedCallError {
    #[error("circuit for '{dependency}' is open, call rejected")]
    CircuitOpen { dependency: String },

    #[error("call to '{dependency}' exhausted all {attempts} attempts: {source}")]
    RetryExhausted {
        dependency: String,
        attempts: u32,
        #[source]
        source: RelayGuardError,
    },

    #[error("call to '{dependency}' failed with non-retryable error: {source}")]
    NonRetryable {
        dependency: String,
        #[source]
        source: RelayGuardError,
    },

    #[error("call to '{dependency}' was cancelled")]
    Cancelled { dependency: String },
}

impl ProtectedCallError {
    pub fn dependency(&self) -> &str {
        match self {
            ProtectedCallError::CircuitOpen { dependency }
            | ProtectedCallError::RetryExhausted { dependency, .. }
            | ProtectedCallError::NonRetryable { dependency, .. }
            | ProtectedCallError::Cancelled { dependency } => dependency,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            ProtectedCallError::CircuitOpen { .. } => "circuit_open",
            ProtectedCallError::RetryExhausted { .. } => "retry_exhausted",
            ProtectedCallError::NonRetryable { .. } => "non_retryable",
            ProtectedCallError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Composes the circuit breaker, retry policy, dead letter queue and admin
/// notifier into a single entry point for calling unreliable dependencies.
///
/// The breaker gates once per protected call and records the final retry
/// outcome, so a burst of retries against a failing dependency counts as
/// one failure rather than several.
pub struct ResilienceGuard {
    registry: CircuitBreakerRegistry,
    breaker_config: CircuitBreakerConfig,
    breaker_overrides: HashMap<String, CircuitBreakerConfig>,
    backoff: BackoffPolicy,
    dlq: Arc<DeadLetterQueue>,
    notifier: Arc<AdminNotifier>,
}

impl ResilienceGuard {
    pub fn new(
        breaker_config: CircuitBreakerConfig,
        backoff: BackoffPolicy,
        dlq: Arc<DeadLetterQueue>,
        notifier: Arc<AdminNotifier>,
    ) -> Self {
        Self {
            registry: CircuitBreakerRegistry::new(),
            breaker_config,
            breaker_overrides: HashMap::new(),
            backoff,
            dlq,
            notifier,
        }
    }

    /// Build a guard with all components wired from configuration.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let storage = dlq::build_storage(&config.dlq)?;
        let dlq = Arc::new(DeadLetterQueue::new(
            storage,
            config.dlq.max_reprocess_attempts,
            Duration::from_secs(config.dlq.visibility_timeout_secs),
        ));

        let channels = build_channels(&config.notifier)?;
        let notifier = Arc::new(AdminNotifier::start(
            channels,
            &config.notifier,
            config.app.name.clone(),
        ));

        let mut guard = Self::new(
            (&config.circuit_breaker).into(),
            (&config.retry).into(),
            dlq,
            notifier,
        );

        for (name, settings) in &config.circuit_breaker_overrides {
            guard.breaker_overrides.insert(name.clone(), settings.into());
        }

        Ok(guard)
    }

    pub fn dlq(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    pub fn notifier(&self) -> &Arc<AdminNotifier> {
        &self.notifier
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    async fn breaker_for(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let config = self
            .breaker_overrides
            .get(dependency)
            .cloned()
            .unwrap_or_else(|| self.breaker_config.clone());
        self.registry.get_or_create(dependency, config).await
    }

    /// Invoke an operation against a dependency with the guard's default
    /// retry policy and no external cancellation.
    pub async fn protected_call<F, Fut, T>(
        &self,
        dependency: &str,
        payload: serde_json::Value,
        operation: F,
    ) -> std::result::Result<T, ProtectedCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let policy = self.backoff.clone();
        let cancel = CancellationToken::new();
        self.protected_call_with(dependency, payload, &policy, &cancel, operation)
            .await
    }

    /// Invoke an operation with an explicit retry policy and cancellation
    /// token.
    ///
    /// The circuit is consulted once up front. A rejected call never
    /// invokes the operation and never reaches the dead letter queue. A
    /// retry-exhausted call records one breaker failure, lands in the DLQ
    /// and raises an admin notification. Cancelled and non-retryable
    /// outcomes leave the breaker untouched.
    pub async fn protected_call_with<F, Fut, T>(
        &self,
        dependency: &str,
        payload: serde_json::Value,
        policy: &BackoffPolicy,
        cancel: &CancellationToken,
        operation: F,
    ) -> std::result::Result<T, ProtectedCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let started = Instant::now();
        let breaker = self.breaker_for(dependency).await;

        if !breaker.is_allowed().await {
            crate::metrics::CIRCUIT_BREAKER_CALLS
                .with_label_values(&[dependency, "rejected"])
                .inc();
            let err = ProtectedCallError::CircuitOpen {
                dependency: dependency.to_string(),
            };
            self.notify_circuit_open(dependency).await;
            self.finish(dependency, &started, err.outcome());
            return Err(err);
        }

        match backoff::run(policy, dependency, cancel, operation).await {
            Ok(result) => {
                breaker.record_success().await;
                crate::metrics::CIRCUIT_BREAKER_CALLS
                    .with_label_values(&[dependency, "success"])
                    .inc();
                self.finish(dependency, &started, "success");
                Ok(result)
            }
            Err(RetryError::Exhausted { attempts, source }) => {
                breaker.record_failure().await;
                crate::metrics::CIRCUIT_BREAKER_CALLS
                    .with_label_values(&[dependency, "failure"])
                    .inc();

                let entry_id = self
                    .dlq
                    .send(dependency, payload.clone(), ErrorInfo::from_error(&source))
                    .await;
                error!(
                    "Call to '{}' exhausted {} attempts, dead-lettered as {}: {}",
                    dependency, attempts, entry_id, source
                );
                self.notify_exhausted(dependency, attempts, &source, &payload, &entry_id)
                    .await;

                let err = ProtectedCallError::RetryExhausted {
                    dependency: dependency.to_string(),
                    attempts,
                    source,
                };
                self.finish(dependency, &started, err.outcome());
                Err(err)
            }
            Err(RetryError::NonRetryable(source)) => {
                // Input faults say nothing about dependency health, so the
                // breaker records neither success nor failure.
                breaker.release_probe().await;
                debug!(
                    "Call to '{}' failed with non-retryable error: {}",
                    dependency, source
                );
                let err = ProtectedCallError::NonRetryable {
                    dependency: dependency.to_string(),
                    source,
                };
                self.finish(dependency, &started, err.outcome());
                Err(err)
            }
            Err(RetryError::Cancelled) => {
                // A cancelled call says nothing about the dependency and
                // must not consume a half-open probe slot.
                breaker.release_probe().await;
                debug!("Call to '{}' cancelled", dependency);
                let err = ProtectedCallError::Cancelled {
                    dependency: dependency.to_string(),
                };
                self.finish(dependency, &started, err.outcome());
                Err(err)
            }
        }
    }

    fn finish(&self, dependency: &str, started: &Instant, outcome: &str) {
        crate::metrics::record_protected_call(dependency, outcome, started.elapsed());
    }

    async fn notify_circuit_open(&self, dependency: &str) {
        warn!("Circuit for '{}' is open, rejecting call", dependency);

        let mut details = HashMap::new();
        details.insert(
            "dependency".to_string(),
            serde_json::json!(dependency),
        );

        self.notifier
            .notify(
                &format!("Circuit breaker for '{}' is open", dependency),
                details,
                Severity::Warning,
                Some(&format!("circuit_open:{}", dependency)),
            )
            .await;
    }

    async fn notify_exhausted(
        &self,
        dependency: &str,
        attempts: u32,
        source: &RelayGuardError,
        payload: &serde_json::Value,
        entry_id: &str,
    ) {
        let mut details = HashMap::new();
        details.insert("dependency".to_string(), serde_json::json!(dependency));
        details.insert("attempts".to_string(), serde_json::json!(attempts));
        details.insert("error".to_string(), serde_json::json!(source.to_string()));
        details.insert("dlq_entry_id".to_string(), serde_json::json!(entry_id));
        details.insert(
            "payload_snapshot".to_string(),
            serde_json::json!(payload_snapshot(payload)),
        );

        self.notifier
            .notify(
                &format!(
                    "Call to '{}' failed after {} attempts and was dead-lettered",
                    dependency, attempts
                ),
                details,
                Severity::Error,
                Some(&format!("retry_exhausted:{}", dependency)),
            )
            .await;
    }
}

/// Compact payload rendering for notifications. Truncates on a char
/// boundary so oversized payloads cannot bloat alert channels.
fn payload_snapshot(payload: &serde_json::Value) -> String {
    let rendered = payload.to_string();
    if rendered.len() <= PAYLOAD_SNAPSHOT_LIMIT {
        return rendered;
    }

    let mut cut = PAYLOAD_SNAPSHOT_LIMIT;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated)", &rendered[..cut])
}
