use crate::circuit_breaker::CircuitState;
use crate::error::{CoreError, Result};
use crate::registry::HealthStatus;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("handle", &"<PrometheusHandle>")
            .finish()
    }
}

impl MetricsService {
    /// Install the process-wide Prometheus recorder.
    ///
    /// Fails if a recorder is already installed.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            CoreError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Retry metrics
        describe_counter!(
            "procurement_retry_attempts_total",
            "Total number of retry attempts scheduled after a failure"
        );
        describe_counter!(
            "procurement_operations_total",
            "Total number of operations executed through the retry executor"
        );
        describe_histogram!(
            "procurement_operation_duration_seconds",
            "Operation latencies including retries, in seconds"
        );

        // Circuit breaker metrics
        describe_gauge!(
            "procurement_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "procurement_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_counter!(
            "procurement_circuit_breaker_rejections_total",
            "Total number of operations rejected by an open circuit"
        );

        // Event bus metrics
        describe_counter!(
            "procurement_events_published_total",
            "Total number of events published on the event bus"
        );
        describe_counter!(
            "procurement_subscriber_failures_total",
            "Total number of subscriber callbacks that failed or panicked"
        );

        // Service metrics
        describe_gauge!(
            "procurement_service_health",
            "Service health (0 = healthy, 1 = degraded, 2 = unhealthy)"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Get the Prometheus metrics handle
    pub fn handle(&self) -> Arc<PrometheusHandle> {
        self.handle.clone()
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record a retry being scheduled
pub fn record_retry_attempt(service: &str, operation: &str) {
    let labels = [
        ("service", service.to_string()),
        ("operation", operation.to_string()),
    ];
    counter!("procurement_retry_attempts_total", &labels).increment(1);
}

/// Record the final outcome of an operation
pub fn record_operation(service: &str, operation: &str, outcome: &str, duration: f64) {
    let labels = [
        ("service", service.to_string()),
        ("operation", operation.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("procurement_operations_total", &labels).increment(1);
    histogram!("procurement_operation_duration_seconds", &labels).record(duration);
}

/// Record circuit breaker state
pub fn record_circuit_breaker_state(key: &str, state: CircuitState) {
    let labels = [("key", key.to_string())];
    gauge!("procurement_circuit_breaker_state", &labels).set(state.as_gauge());
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(key: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("key", key.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!("procurement_circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record an operation rejected by an open circuit
pub fn record_circuit_breaker_rejection(key: &str) {
    let labels = [("key", key.to_string())];
    counter!("procurement_circuit_breaker_rejections_total", &labels).increment(1);
}

/// Record a published event
pub fn record_event_published(event_type: &str) {
    let labels = [("event_type", event_type.to_string())];
    counter!("procurement_events_published_total", &labels).increment(1);
}

/// Record a failed subscriber callback
pub fn record_subscriber_failure(event_type: &str) {
    let labels = [("event_type", event_type.to_string())];
    counter!("procurement_subscriber_failures_total", &labels).increment(1);
}

/// Record service health
pub fn record_service_health(service: &str, status: HealthStatus) {
    let labels = [("service", service.to_string())];
    gauge!("procurement_service_health", &labels).set(status.severity() as f64);
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    service: String,
    operation: String,
}

impl OperationTimer {
    /// Start a new timer for an operation
    pub fn new(service: &str, operation: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Record the elapsed time with the given outcome
    pub fn record(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.service, &self.operation, outcome, duration);
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
