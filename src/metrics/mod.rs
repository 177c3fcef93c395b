use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Protected calls by final outcome
    pub static ref PROTECTED_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "relayguard_protected_calls_total",
        "Total number of protected calls by final outcome",
        &["dependency", "outcome"]
    ).unwrap();

    /// Protected call duration
    pub static ref PROTECTED_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "relayguard_protected_call_duration_seconds",
        "End-to-end protected call duration including retries",
        &["dependency"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    /// Circuit breaker calls
    pub static ref CIRCUIT_BREAKER_CALLS: CounterVec = register_counter_vec!(
        "relayguard_circuit_breaker_calls_total",
        "Total number of circuit breaker calls",
        &["name", "result"]
    ).unwrap();

    /// Circuit breaker current state
    pub static ref CIRCUIT_STATE: GaugeVec = register_gauge_vec!(
        "relayguard_circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=open, 2=half-open)",
        &["name"]
    ).unwrap();

    /// Retry attempts
    pub static ref RETRY_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "relayguard_retry_attempts_total",
        "Total number of retry attempts",
        &["operation"]
    ).unwrap();

    /// Dead letter queue entries
    pub static ref DEAD_LETTER_ENTRIES_TOTAL: CounterVec = register_counter_vec!(
        "relayguard_dead_letter_entries_total",
        "Total number of entries sent to the dead letter queue",
        &["dependency"]
    ).unwrap();

    /// Dead letter queue size
    pub static ref DEAD_LETTER_QUEUE_SIZE: GaugeVec = register_gauge_vec!(
        "relayguard_dead_letter_queue_size",
        "Current number of pending dead letter entries",
        &["dependency"]
    ).unwrap();

    /// Dead letter reprocess attempts
    pub static ref DEAD_LETTER_REPROCESS_TOTAL: CounterVec = register_counter_vec!(
        "relayguard_dead_letter_reprocess_total",
        "Total number of dead letter reprocess attempts",
        &["dependency", "status"]
    ).unwrap();

    /// Admin notifications
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = register_counter_vec!(
        "relayguard_notifications_total",
        "Total number of admin notifications by channel and outcome",
        &["channel", "outcome"]
    ).unwrap();
}

/// Record a completed protected call
pub fn record_protected_call(dependency: &str, outcome: &str, duration: Duration) {
    PROTECTED_CALLS_TOTAL
        .with_label_values(&[dependency, outcome])
        .inc();
    PROTECTED_CALL_DURATION
        .with_label_values(&[dependency])
        .observe(duration.as_secs_f64());
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
