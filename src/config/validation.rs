use super::Config;
use crate::error::{RelayGuardError, Result};

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_breaker(&config.circuit_breaker, "circuit_breaker", &mut errors);
        for (name, overrides) in &config.circuit_breaker_overrides {
            Self::validate_breaker(
                overrides,
                &format!("circuit_breaker_overrides.{}", name),
                &mut errors,
            );
        }

        // Validate retry configuration
        if config.retry.base_delay_ms == 0 {
            errors.push("retry.base_delay_ms must be > 0".to_string());
        }
        if config.retry.max_delay_ms < config.retry.base_delay_ms {
            errors.push("retry.max_delay_ms must be >= base_delay_ms".to_string());
        }
        if config.retry.multiplier < 1.0 {
            errors.push("retry.multiplier must be >= 1.0".to_string());
        }

        // Validate DLQ configuration
        match config.dlq.backend.as_str() {
            "memory" => {}
            "file" => {
                if config.dlq.file_path.is_none() {
                    errors.push("dlq.file_path is required for the file backend".to_string());
                }
            }
            "redis" => {
                if config.dlq.redis_url.is_none() {
                    errors.push("dlq.redis_url is required for the redis backend".to_string());
                }
            }
            other => {
                errors.push(format!("Unknown DLQ backend: {}", other));
            }
        }
        if config.dlq.max_reprocess_attempts == 0 {
            errors.push("dlq.max_reprocess_attempts must be > 0".to_string());
        }
        if config.dlq.visibility_timeout_secs == 0 {
            errors.push("dlq.visibility_timeout_secs must be > 0".to_string());
        }

        // Validate notifier configuration
        for channel in &config.notifier.channels {
            match channel.as_str() {
                "log" => {}
                "redis_topic" => {
                    if config.notifier.redis_url.is_none() {
                        errors.push(
                            "notifier.redis_url is required for the redis_topic channel"
                                .to_string(),
                        );
                    }
                    if config.notifier.topic.is_none() {
                        errors.push(
                            "notifier.topic is required for the redis_topic channel".to_string(),
                        );
                    }
                }
                other => {
                    errors.push(format!("Unknown notifier channel: {}", other));
                }
            }
        }
        if config.notifier.queue_capacity == 0 {
            errors.push("notifier.queue_capacity must be > 0".to_string());
        }
        if config.notifier.send_timeout_ms == 0 {
            errors.push("notifier.send_timeout_ms must be > 0".to_string());
        }

        if !errors.is_empty() {
            return Err(RelayGuardError::Validation(errors.join(", ")));
        }

        Ok(())
    }

    fn validate_breaker(
        settings: &super::CircuitBreakerSettings,
        path: &str,
        errors: &mut Vec<String>,
    ) {
        if settings.failure_threshold == 0 {
            errors.push(format!("{}.failure_threshold must be > 0", path));
        }
        if settings.success_threshold == 0 {
            errors.push(format!("{}.success_threshold must be > 0", path));
        }
        if settings.half_open_max_probes == 0 {
            errors.push(format!("{}.half_open_max_probes must be > 0", path));
        }
    }
}
