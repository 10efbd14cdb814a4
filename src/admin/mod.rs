use crate::circuit_breaker::BreakerStats;
use crate::config::AdminConfig;
use crate::error::{CoreError, Result};
use crate::events::{EventStats, SubscriptionStats};
use crate::metrics::MetricsService;
use crate::orchestrator::{Orchestrator, OrchestratorHealth, OrchestratorMetrics, OrchestratorStatus};
use crate::registry::{HealthStatus, ServiceDescriptor};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the admin endpoints
#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<Orchestrator>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<MetricsService>,
}

impl AdminState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the admin router
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/prometheus", get(prometheus_handler))
        .route("/services", get(list_services_handler))
        .route("/services/:name", get(service_handler))
        .route("/events/stats", get(event_stats_handler))
        .route("/events/subscriptions", get(subscription_stats_handler))
        .route("/circuit-breakers", get(circuit_breakers_handler))
        .route("/circuit-breakers/:key/reset", post(reset_circuit_breaker_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the admin API until the server fails
pub async fn serve_admin(config: &AdminConfig, state: AdminState) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Admin API listening");

    axum::serve(listener, admin_router(state))
        .await
        .map_err(|e| CoreError::Internal(format!("Admin server error: {}", e)))?;

    Ok(())
}

/// 503 when any service is unhealthy
async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let health: OrchestratorHealth = state.orchestrator.health_check().await;
    let status = match health.overall {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(health))
}

async fn status_handler(State(state): State<AdminState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.get_status().await)
}

async fn metrics_handler(State(state): State<AdminState>) -> Json<OrchestratorMetrics> {
    Json(state.orchestrator.get_metrics().await)
}

async fn prometheus_handler(State(state): State<AdminState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(MetricsService::render)
        .ok_or_else(|| CoreError::NotFound("Prometheus exporter is not installed".to_string()))
}

async fn list_services_handler(State(state): State<AdminState>) -> Json<Vec<ServiceDescriptor>> {
    Json(state.orchestrator.registry().list_services().await)
}

async fn service_handler(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceDescriptor>> {
    let descriptor = state.orchestrator.registry().discover(&name).await?;
    Ok(Json(descriptor))
}

async fn event_stats_handler(State(state): State<AdminState>) -> Json<EventStats> {
    Json(state.orchestrator.event_bus().get_event_stats())
}

async fn subscription_stats_handler(State(state): State<AdminState>) -> Json<SubscriptionStats> {
    Json(state.orchestrator.event_bus().get_subscription_stats())
}

async fn circuit_breakers_handler(
    State(state): State<AdminState>,
) -> Json<BTreeMap<String, BreakerStats>> {
    Json(
        state
            .orchestrator
            .retry_executor()
            .get_circuit_breaker_stats(None)
            .await,
    )
}

async fn reset_circuit_breaker_handler(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    if !state.orchestrator.retry_executor().reset_circuit_breaker(&key).await {
        return Err(CoreError::NotFound(format!("circuit breaker '{}'", key)));
    }

    info!(key = %key, "Circuit breaker reset via admin API");
    Ok(Json(json!({ "key": key, "state": "closed" })))
}
