use crate::error::RelayGuardError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff policy. Stateless; parameterized per call site.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of retries (attempt 0 is the first try, not a retry)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Sleep a uniform random duration in [0, delay] instead of the full delay
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pre-jitter delay for a 0-indexed attempt:
    /// `min(max_delay, base_delay * multiplier^attempt)`.
    /// Monotonically non-decreasing up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            use rand::Rng;
            delay.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
        } else {
            delay
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal outcome of a retried operation
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("all {attempts} attempts exhausted: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: RelayGuardError,
    },

    #[error("non-retryable failure: {0}")]
    NonRetryable(#[source] RelayGuardError),

    #[error("operation cancelled")]
    Cancelled,
}

/// Classifies a failure as transient (worth retrying) or fatal
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::WouldBlock
        )
    }
}

impl Retryable for RelayGuardError {
    fn is_retryable(&self) -> bool {
        match self {
            RelayGuardError::Io(e) => e.is_retryable(),
            RelayGuardError::Redis(_) => true,
            RelayGuardError::Timeout(_) => true,
            RelayGuardError::RateLimited(_) => true,
            RelayGuardError::Dependency(msg) => {
                msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("unavailable")
                    || msg.contains("Too Many Requests")
            }
            RelayGuardError::Config(_) => false,
            RelayGuardError::Validation(_) => false,
            RelayGuardError::Serialization(_) => false,
            _ => false,
        }
    }
}

/// Retry an operation with exponential backoff, classifying failures via
/// the `Retryable` trait.
pub async fn run<F, Fut, T>(
    policy: &BackoffPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    operation: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    run_with(policy, operation_name, cancel, operation, |e| {
        e.is_retryable()
    })
    .await
}

/// Retry an operation with an explicit retryable predicate. The delay
/// between attempts races the cancellation token; cancellation returns
/// promptly without completing the remaining retries.
pub async fn run_with<F, Fut, T, P>(
    policy: &BackoffPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: P,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
    P: Fn(&RelayGuardError) -> bool,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!("Operation '{}' cancelled before attempt", operation_name);
            return Err(RetryError::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    debug!(
                        "Operation '{}' failed with non-retryable error: {}",
                        operation_name, error
                    );
                    return Err(RetryError::NonRetryable(error));
                }

                if attempt >= policy.max_retries {
                    warn!(
                        "Operation '{}' exhausted all {} attempts: {}",
                        operation_name,
                        attempt + 1,
                        error
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        source: error,
                    });
                }

                let delay = policy.sleep_for(attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay,
                    error
                );
                crate::metrics::RETRY_ATTEMPTS_TOTAL
                    .with_label_values(&[operation_name])
                    .inc();

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Operation '{}' cancelled during backoff", operation_name);
                        return Err(RetryError::Cancelled);
                    }
                    _ = sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }
}
