use crate::error::RelayGuardError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through
    Closed,
    /// Circuit is open, calls are rejected without invoking the dependency
    Open,
    /// Circuit is half-open, a bounded number of trial calls pass through
    HalfOpen,
}

impl CircuitState {
    fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to stay open before probing for recovery
    pub recovery_timeout: Duration,
    /// Successful trials required to close from half-open
    pub success_threshold: u32,
    /// Maximum trial calls admitted while half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_probes: 1,
        }
    }
}

/// Mutable breaker state. Kept behind a single mutex so every transition
/// decision and counter write is atomic with respect to concurrent callers.
#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_probes: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_probes: 0,
            last_failure_time: None,
            opened_at: None,
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_probes = 0;
        self.last_failure_time = None;
        self.opened_at = None;
    }
}

/// Circuit breaker for a single protected dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether a call is allowed, performing the Open -> HalfOpen
    /// transition when the recovery timeout has elapsed.
    pub async fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| Instant::now().duration_since(t))
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.recovery_timeout {
                    info!(
                        "Circuit breaker '{}' transitioning from Open to HalfOpen",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probes = 1;
                    inner.consecutive_successes = 0;
                    self.publish_state(inner.state);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_probes {
                    inner.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;

        inner.consecutive_successes += 1;
        inner.consecutive_failures = 0;

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                // A call that started before the circuit opened may still
                // succeed; nothing to transition.
                warn!(
                    "Success recorded while circuit breaker '{}' is open",
                    self.name
                );
            }
            CircuitState::HalfOpen => {
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!(
                        "Circuit breaker '{}' recovered, transitioning from HalfOpen to Closed",
                        self.name
                    );
                    inner.reset();
                    self.publish_state(inner.state);
                }
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;

        inner.consecutive_failures += 1;
        inner.consecutive_successes = 0;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker '{}' opening after {} consecutive failures",
                        self.name, inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    self.publish_state(inner.state);
                }
            }
            CircuitState::Open => {}
            CircuitState::HalfOpen => {
                warn!(
                    "Circuit breaker '{}' failed in HalfOpen state, transitioning back to Open",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probes = 0;
                self.publish_state(inner.state);
            }
        }
    }

    /// Return a half-open probe slot without recording an outcome. Used
    /// when an admitted trial call is cancelled before completing, so the
    /// slot stays available for the next caller.
    pub async fn release_probe(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::HalfOpen && inner.half_open_probes > 0 {
            inner.half_open_probes -= 1;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Force the circuit into a specific state (operator/test hook)
    pub async fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock().await;

        info!(
            "Circuit breaker '{}' state manually changed from {:?} to {:?}",
            self.name, inner.state, new_state
        );

        match new_state {
            CircuitState::Closed => inner.reset(),
            CircuitState::Open => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_probes = 0;
                inner.consecutive_successes = 0;
            }
        }
        self.publish_state(inner.state);
    }

    /// Execute an operation under the breaker's gate. The breaker lock is
    /// not held while the operation runs.
    pub async fn execute<F, T>(&self, operation: F) -> std::result::Result<T, CircuitError>
    where
        F: std::future::Future<Output = crate::error::Result<T>>,
    {
        if !self.is_allowed().await {
            crate::metrics::CIRCUIT_BREAKER_CALLS
                .with_label_values(&[&self.name, "rejected"])
                .inc();
            return Err(CircuitError::Open(self.name.clone()));
        }

        match operation.await {
            Ok(result) => {
                self.record_success().await;
                crate::metrics::CIRCUIT_BREAKER_CALLS
                    .with_label_values(&[&self.name, "success"])
                    .inc();
                Ok(result)
            }
            Err(error) => {
                self.record_failure().await;
                crate::metrics::CIRCUIT_BREAKER_CALLS
                    .with_label_values(&[&self.name, "failure"])
                    .inc();
                Err(CircuitError::Operation(error))
            }
        }
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().await;

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_time: inner.last_failure_time,
            opened_at: inner.opened_at,
        }
    }

    fn publish_state(&self, state: CircuitState) {
        crate::metrics::CIRCUIT_STATE
            .with_label_values(&[&self.name])
            .set(state.as_gauge());
    }
}

/// Gate-level error: either the circuit rejected the call or the underlying
/// operation failed. The original error is always preserved.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("circuit '{0}' is open")]
    Open(String),

    #[error(transparent)]
    Operation(RelayGuardError),
}

/// Point-in-time breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
    pub opened_at: Option<Instant>,
}

/// Process-wide registry mapping dependency name to its breaker. Each
/// breaker is independently synchronized; the registry lock covers only
/// the map itself.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().await;

        if let Some(breaker) = breakers.get(name) {
            breaker.clone()
        } else {
            let breaker = Arc::new(CircuitBreaker::new(name.to_string(), config));
            breakers.insert(name.to_string(), breaker.clone());
            breaker
        }
    }

    pub async fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = Vec::new();

        for breaker in breakers.values() {
            stats.push(breaker.stats().await);
        }

        stats
    }

    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;

        for breaker in breakers.values() {
            breaker.force_state(CircuitState::Closed).await;
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
