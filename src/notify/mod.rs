mod channels;

pub use channels::{build_channels, LogChannel, RedisTopicChannel};

use crate::config::NotifierSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Operator-facing alert. Ephemeral; delivery is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub severity: Severity,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
    pub error_type: Option<String>,
    pub application: String,
    pub timestamp: DateTime<Utc>,
}

/// Delivery channel for notifications
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> crate::error::Result<()>;

    fn name(&self) -> &'static str;
}

/// Multi-channel alert sender.
///
/// Events are queued onto a bounded channel and delivered by a background
/// task, so a slow channel never blocks the calling flow. Repeated alerts
/// sharing an `error_type` are throttled to one per `throttle_period`;
/// events without an error type are never throttled.
pub struct AdminNotifier {
    tx: Mutex<Option<mpsc::Sender<NotificationEvent>>>,
    application: String,
    throttle_period: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AdminNotifier {
    /// Spawn the dispatch task and return the notifier handle.
    pub fn start(
        channels: Vec<Arc<dyn NotificationChannel>>,
        settings: &NotifierSettings,
        application: String,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let send_timeout = Duration::from_millis(settings.send_timeout_ms);

        let handle = tokio::spawn(Self::dispatch_loop(rx, channels, send_timeout));

        Self {
            tx: Mutex::new(Some(tx)),
            application,
            throttle_period: Duration::from_secs(settings.throttle_period_secs),
            last_sent: Mutex::new(HashMap::new()),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a notification. Infallible from the caller's perspective:
    /// throttled duplicates and queue overflow are logged and dropped,
    /// channel failures are handled by the dispatch task.
    pub async fn notify(
        &self,
        message: &str,
        details: HashMap<String, serde_json::Value>,
        severity: Severity,
        error_type: Option<&str>,
    ) {
        if let Some(error_type) = error_type {
            if !self.should_send(error_type).await {
                debug!(
                    "Throttling notification for error type '{}'",
                    error_type
                );
                crate::metrics::NOTIFICATIONS_TOTAL
                    .with_label_values(&["-", "throttled"])
                    .inc();
                return;
            }
        }

        let event = NotificationEvent {
            severity,
            message: message.to_string(),
            details,
            error_type: error_type.map(|s| s.to_string()),
            application: self.application.clone(),
            timestamp: Utc::now(),
        };

        let tx = self.tx.lock().await.clone();
        match tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(event) {
                    warn!("Dropping notification, queue unavailable: {}", e);
                    crate::metrics::NOTIFICATIONS_TOTAL
                        .with_label_values(&["-", "dropped"])
                        .inc();
                }
            }
            None => {
                warn!("Dropping notification, notifier is shut down");
            }
        }
    }

    /// Report a dependency health transition. Healthy reports are
    /// informational and unthrottled; unhealthy reports share the
    /// `health_check` throttle key to dampen alert storms.
    pub async fn notify_health(
        &self,
        is_healthy: bool,
        mut details: HashMap<String, serde_json::Value>,
    ) {
        details.insert("is_healthy".to_string(), serde_json::json!(is_healthy));

        let (message, severity, error_type) = if is_healthy {
            ("Dependency health restored", Severity::Info, None)
        } else {
            (
                "Dependency health check failed",
                Severity::Error,
                Some("health_check"),
            )
        };

        self.notify(message, details, severity, error_type).await;
    }

    /// Drain buffered events and stop the dispatch task. The notifier
    /// drops further events afterwards.
    pub async fn shutdown(&self) {
        // Dropping the sender closes the channel; the dispatch loop
        // drains whatever is buffered and exits.
        self.tx.lock().await.take();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn should_send(&self, error_type: &str) -> bool {
        if self.throttle_period.is_zero() {
            return true;
        }

        let mut last_sent = self.last_sent.lock().await;
        let now = Instant::now();

        match last_sent.get(error_type) {
            Some(last) if now.duration_since(*last) < self.throttle_period => false,
            _ => {
                last_sent.insert(error_type.to_string(), now);
                true
            }
        }
    }

    async fn dispatch_loop(
        mut rx: mpsc::Receiver<NotificationEvent>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        send_timeout: Duration,
    ) {
        while let Some(event) = rx.recv().await {
            for channel in &channels {
                match timeout(send_timeout, channel.send(&event)).await {
                    Ok(Ok(())) => {
                        debug!(
                            "Delivered {} notification via {}",
                            event.severity.as_str(),
                            channel.name()
                        );
                        crate::metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&[channel.name(), "sent"])
                            .inc();
                    }
                    Ok(Err(e)) => {
                        error!(
                            "Notification channel '{}' failed: {}",
                            channel.name(),
                            e
                        );
                        crate::metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&[channel.name(), "failed"])
                            .inc();
                    }
                    Err(_) => {
                        error!(
                            "Notification channel '{}' timed out after {:?}",
                            channel.name(),
                            send_timeout
                        );
                        crate::metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&[channel.name(), "timeout"])
                            .inc();
                    }
                }
            }
        }

        info!("Notification dispatch loop stopped");
    }
}
