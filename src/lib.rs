pub mod admin;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;

use crate::admin::{serve_admin, AdminState};
use crate::circuit_breaker::CircuitBreakerService;
use crate::config::{CoreConfig, LogFormat, LoggingConfig};
use crate::error::{CoreError, Result};
use crate::events::EventBus;
use crate::metrics::MetricsService;
use crate::orchestrator::Orchestrator;
use crate::registry::ServiceRegistry;
use crate::retry::{RetryExecutor, RetryPolicy};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.filter.as_str().into());

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .try_init(),
    };

    result.map_err(|e| CoreError::Config(format!("Failed to initialize tracing: {}", e)))?;

    info!(format = ?config.format, "Tracing initialized");
    Ok(())
}

/// The wired resilience core: one event bus, one breaker set and one retry
/// executor shared by the registry and orchestrator.
pub struct CoreServices {
    pub config: CoreConfig,
    pub event_bus: EventBus,
    pub circuit_breakers: CircuitBreakerService,
    pub retry: Arc<RetryExecutor>,
    pub registry: Arc<ServiceRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

impl CoreServices {
    /// Validate `config` and build the shared components
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_bus.history_size);
        let circuit_breakers = CircuitBreakerService::new();

        let retry = Arc::new(
            RetryExecutor::new(circuit_breakers.clone(), RetryPolicy::from(&config.retry))
                .with_circuit_breaker(config.circuit_breaker.clone())
                .with_event_bus(event_bus.clone()),
        );

        let registry = Arc::new(ServiceRegistry::new(
            config.orchestrator.health_check_timeout(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            event_bus.clone(),
            retry.clone(),
            config.orchestrator.clone(),
        ));

        info!(
            max_attempts = config.retry.max_attempts,
            circuit_breaker = config.circuit_breaker.enabled,
            history_size = config.event_bus.history_size,
            "Core services initialized"
        );

        Ok(Self {
            config,
            event_bus,
            circuit_breakers,
            retry,
            registry,
            orchestrator,
        })
    }

    /// Serve the admin API in the background when `admin.enabled` is set
    pub fn spawn_admin(&self, metrics: Option<MetricsService>) -> Option<JoinHandle<Result<()>>> {
        if !self.config.admin.enabled {
            return None;
        }

        let mut state = AdminState::new(self.orchestrator.clone());
        if let Some(metrics) = metrics {
            state = state.with_metrics(metrics);
        }

        let config = self.config.admin.clone();
        Some(tokio::spawn(async move { serve_admin(&config, state).await }))
    }
}
