mod loader;
mod logging;
mod validation;

pub use loader::*;
pub use logging::*;
pub use validation::*;

use crate::backoff::BackoffPolicy;
use crate::breaker::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default circuit breaker parameters
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Per-dependency circuit breaker overrides
    #[serde(default)]
    pub circuit_breaker_overrides: HashMap<String, CircuitBreakerSettings>,

    /// Default retry/backoff parameters
    #[serde(default)]
    pub retry: RetrySettings,

    /// Dead letter queue configuration
    #[serde(default)]
    pub dlq: DlqSettings,

    /// Admin notifier configuration
    #[serde(default)]
    pub notifier: NotifierSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            logging: LoggingConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            circuit_breaker_overrides: HashMap::new(),
            retry: RetrySettings::default(),
            dlq: DlqSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds to stay open before probing for recovery
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Successful trials required to close from half-open
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Maximum trial calls admitted while half-open
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
            success_threshold: settings.success_threshold,
            half_open_max_probes: settings.half_open_max_probes,
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl From<&RetrySettings> for BackoffPolicy {
    fn from(settings: &RetrySettings) -> Self {
        BackoffPolicy::new()
            .with_max_retries(settings.max_retries)
            .with_base_delay(Duration::from_millis(settings.base_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_multiplier(settings.multiplier)
            .with_jitter(settings.jitter)
    }
}

/// Dead letter queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DlqSettings {
    /// Storage backend (memory, file, redis)
    #[serde(default = "default_dlq_backend")]
    pub backend: String,

    /// Local append-only log path (file backend)
    #[serde(default)]
    pub file_path: Option<String>,

    /// Redis connection URL (redis backend)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for Redis keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Reprocessing attempts before an entry is marked Dead
    #[serde(default = "default_max_reprocess_attempts")]
    pub max_reprocess_attempts: u32,

    /// Seconds an InFlight entry stays invisible before returning to Pending
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            backend: default_dlq_backend(),
            file_path: None,
            redis_url: None,
            key_prefix: default_key_prefix(),
            max_reprocess_attempts: default_max_reprocess_attempts(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

/// Admin notifier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierSettings {
    /// Enabled channels (log, redis_topic); empty means log-only
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Redis connection URL (redis_topic channel)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Alert topic name (redis_topic channel)
    #[serde(default)]
    pub topic: Option<String>,

    /// Seconds between notifications sharing an error type (0 disables)
    #[serde(default = "default_throttle_period_secs")]
    pub throttle_period_secs: u64,

    /// Per-channel send timeout in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Bounded dispatch queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            redis_url: None,
            topic: None,
            throttle_period_secs: default_throttle_period_secs(),
            send_timeout_ms: default_send_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "relayguard".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    60
}
fn default_success_threshold() -> u32 {
    1
}
fn default_half_open_max_probes() -> u32 {
    1
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}
fn default_dlq_backend() -> String {
    "memory".to_string()
}
fn default_key_prefix() -> String {
    "relayguard".to_string()
}
fn default_max_reprocess_attempts() -> u32 {
    3
}
fn default_visibility_timeout_secs() -> u64 {
    300
}
fn default_channels() -> Vec<String> {
    vec!["log".to_string()]
}
fn default_throttle_period_secs() -> u64 {
    300
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_queue_capacity() -> usize {
    1000
}
