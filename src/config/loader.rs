use super::Config;
use crate::error::{RelayGuardError, Result};
use config::{Config as ConfigBuilder, Environment, File};
use std::env;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        // Load from config file if specified
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        } else {
            // Try to load default config files
            let config_files = [
                "config.yaml",
                "config.yml",
                "relayguard.yaml",
                "relayguard.yml",
            ];
            for file in &config_files {
                if Path::new(file).exists() {
                    builder = builder.add_source(File::with_name(file));
                    break;
                }
            }
        }

        // Override with environment variables
        // RELAYGUARD__RETRY__MAX_RETRIES=3 becomes retry.max_retries
        builder = builder.add_source(
            Environment::with_prefix("RELAYGUARD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| RelayGuardError::Config(format!("Failed to build config: {}", e)))?;

        let config: Config = config
            .try_deserialize()
            .map_err(|e| RelayGuardError::Config(format!("Failed to deserialize config: {}", e)))?;

        super::ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &str) -> Result<Config> {
        env::set_var("CONFIG_PATH", path);
        Self::load()
    }

    /// Create a sample configuration file
    pub fn generate_sample() -> &'static str {
        r#"# RelayGuard Configuration Example
# Copy this file to config.yaml and adjust for your environment

app:
  name: relayguard-dev
  environment: development

# Circuit breaker defaults, applied to every dependency
circuit_breaker:
  failure_threshold: 5
  recovery_timeout_secs: 60
  success_threshold: 1
  half_open_max_probes: 1

# Per-dependency overrides
circuit_breaker_overrides:
  payments:
    failure_threshold: 3
    recovery_timeout_secs: 120

# Retry with exponential backoff
retry:
  max_retries: 5
  base_delay_ms: 1000
  max_delay_ms: 60000
  multiplier: 2.0
  jitter: true

# Dead letter queue
dlq:
  backend: memory  # memory, file, or redis
  # file_path: ./relayguard-dlq.jsonl
  # redis_url: redis://localhost:6379
  key_prefix: relayguard
  max_reprocess_attempts: 3
  visibility_timeout_secs: 300

# Admin notifications
notifier:
  channels:
    - log
    # - redis_topic
  # redis_url: redis://localhost:6379
  # topic: relayguard:alerts
  throttle_period_secs: 300
  send_timeout_ms: 2000
  queue_capacity: 1000

# Logging configuration
logging:
  level: info
  format: text  # text, json, or pretty
"#
    }
}
