use crate::config::NotifierSettings;
use crate::error::{RelayGuardError, Result};
use crate::notify::{NotificationChannel, NotificationEvent, Severity};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Log-sink channel: alerts land in the structured log at the level
/// matching their severity. The development default.
pub struct LogChannel;

#[async_trait::async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;

        match event.severity {
            Severity::Info => info!(
                "NOTIFICATION [{}]: {} details={}",
                event.severity.as_str(),
                event.message,
                details
            ),
            Severity::Warning => warn!(
                "NOTIFICATION [{}]: {} details={}",
                event.severity.as_str(),
                event.message,
                details
            ),
            Severity::Error | Severity::Critical => error!(
                "NOTIFICATION [{}]: {} details={}",
                event.severity.as_str(),
                event.message,
                details
            ),
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Managed alert-topic channel: publishes the serialized event to a
/// Redis pub/sub topic consumed by operator tooling.
pub struct RedisTopicChannel {
    client: redis::Client,
    topic: String,
}

impl RedisTopicChannel {
    pub fn new(redis_url: &str, topic: String) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            RelayGuardError::Config(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self { client, topic })
    }
}

#[async_trait::async_trait]
impl NotificationChannel for RedisTopicChannel {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        redis::cmd("PUBLISH")
            .arg(&self.topic)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis_topic"
    }
}

/// Select notification channels from configuration
pub fn build_channels(settings: &NotifierSettings) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    for name in &settings.channels {
        match name.as_str() {
            "log" => channels.push(Arc::new(LogChannel)),
            "redis_topic" => {
                let url = settings.redis_url.as_deref().ok_or_else(|| {
                    RelayGuardError::Config(
                        "notifier.redis_url is required for the redis_topic channel".into(),
                    )
                })?;
                let topic = settings.topic.clone().ok_or_else(|| {
                    RelayGuardError::Config(
                        "notifier.topic is required for the redis_topic channel".into(),
                    )
                })?;
                channels.push(Arc::new(RedisTopicChannel::new(url, topic)?));
            }
            other => {
                return Err(RelayGuardError::Config(format!(
                    "Unknown notification channel '{}' (expected log or redis_topic)",
                    other
                )))
            }
        }
    }

    if channels.is_empty() {
        info!("No notification channels configured, using log-only mode");
        channels.push(Arc::new(LogChannel));
    }

    Ok(channels)
}
