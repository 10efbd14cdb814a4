pub mod types;

pub use types::{
    OrchestratorHealth, OrchestratorMetrics, OrchestratorStatus, OrchestratorSummary,
    ServiceFailure, ServiceMetrics, ServiceStatusEntry, ShutdownReport, StartupReport,
};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::events::{event_types, EventBus, EventData};
use crate::registry::{
    HealthStatus, ManagedService, ServiceDescriptor, ServiceRegistry, ServiceStatus,
};
use crate::retry::{OperationContext, RetryExecutor};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Service name used on events the orchestrator publishes about itself
pub const ORCHESTRATOR_SERVICE: &str = "orchestrator";

/// Owns the start/stop lifecycle of registered services and aggregates
/// their health and metrics.
///
/// `start` and `stop` are serialized against each other; status, health and
/// metrics reads never wait on them.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    event_bus: EventBus,
    retry: Arc<RetryExecutor>,
    config: OrchestratorConfig,
    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        event_bus: EventBus,
        retry: Arc<RetryExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            event_bus,
            retry,
            config,
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn retry_executor(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a service with the underlying registry
    pub async fn register(&self, service: Arc<dyn ManagedService>) -> Result<ServiceDescriptor> {
        self.registry.register(service).await
    }

    /// Start every registered service in registration order.
    ///
    /// A service that fails to start is marked `error` and the remaining
    /// services are still started.
    pub async fn start(&self) -> StartupReport {
        let _lifecycle = self.lifecycle.lock().await;
        let mut report = StartupReport::default();

        if self.is_running() {
            warn!("Orchestrator already running");
            return report;
        }

        info!("Starting orchestrator");
        let policy = self
            .retry
            .default_policy()
            .clone()
            .with_max_attempts(self.config.start_attempts);

        for (descriptor, service) in self.registry.snapshot().await {
            let name = descriptor.name;
            let context = OperationContext::new(name.clone(), "start");

            let result = self
                .retry
                .execute_with_retry(
                    || {
                        let service = service.clone();
                        async move { service.start().await }
                    },
                    &context,
                    &policy,
                    None,
                )
                .await;

            match result {
                Ok(()) => {
                    info!(service = %name, "Service started");
                    self.registry
                        .set_status(&name, ServiceStatus::Running, None)
                        .await;
                    self.event_bus
                        .emit(event_types::SERVICE_STARTED, &name, EventData::ServiceStarted);
                    report.started.push(name);
                }
                Err(e) => {
                    error!(service = %name, error = %e, "Service failed to start");
                    let error = e.to_string();
                    self.registry
                        .set_status(&name, ServiceStatus::Error, Some(error.clone()))
                        .await;
                    self.event_bus.emit(
                        event_types::SERVICE_FAILED,
                        &name,
                        EventData::ServiceFailed {
                            error: error.clone(),
                        },
                    );
                    report.failed.push(ServiceFailure { name, error });
                }
            }
        }

        *self.started_at.lock() = Some(Instant::now());
        self.running.store(true, Ordering::Release);

        if report.is_partial() {
            warn!(
                started = report.started.len(),
                failed = report.failed.len(),
                "Orchestrator started with failed services"
            );
        } else {
            info!(started = report.started.len(), "Orchestrator started");
        }

        self.event_bus.emit(
            event_types::ORCHESTRATOR_STARTED,
            ORCHESTRATOR_SERVICE,
            EventData::OrchestratorStarted {
                started: report.started.len(),
                failed: report.failed.len(),
            },
        );

        report
    }

    /// Stop running services in reverse registration order, best-effort
    pub async fn stop(&self) -> ShutdownReport {
        let _lifecycle = self.lifecycle.lock().await;
        let mut report = ShutdownReport::default();

        info!("Stopping orchestrator");

        let services = self.registry.snapshot().await;
        for (descriptor, service) in services.into_iter().rev() {
            if descriptor.status != ServiceStatus::Running {
                continue;
            }
            let name = descriptor.name;

            match service.stop().await {
                Ok(()) => {
                    info!(service = %name, "Service stopped");
                    self.registry
                        .set_status(&name, ServiceStatus::Stopped, None)
                        .await;
                    self.event_bus
                        .emit(event_types::SERVICE_STOPPED, &name, EventData::ServiceStopped);
                    report.stopped.push(name);
                }
                Err(e) => {
                    warn!(service = %name, error = %e, "Service failed to stop");
                    let error = e.to_string();
                    self.registry
                        .set_status(&name, ServiceStatus::Error, Some(error.clone()))
                        .await;
                    self.event_bus.emit(
                        event_types::SERVICE_FAILED,
                        &name,
                        EventData::ServiceFailed {
                            error: error.clone(),
                        },
                    );
                    report.failed.push(ServiceFailure { name, error });
                }
            }
        }

        *self.started_at.lock() = None;
        self.running.store(false, Ordering::Release);

        info!(stopped = report.stopped.len(), "Orchestrator stopped");
        self.event_bus.emit(
            event_types::ORCHESTRATOR_STOPPED,
            ORCHESTRATOR_SERVICE,
            EventData::OrchestratorStopped {
                stopped: report.stopped.len(),
            },
        );

        report
    }

    /// Stop, then deregister every service
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.stop().await;
        for descriptor in self.registry.list_services().await {
            self.registry.deregister(&descriptor.name).await;
        }
        report
    }

    pub async fn get_status(&self) -> OrchestratorStatus {
        let services = self
            .registry
            .list_services()
            .await
            .into_iter()
            .map(|d| ServiceStatusEntry {
                name: d.name,
                status: d.status,
                uptime_ms: d.uptime_ms,
            })
            .collect();

        OrchestratorStatus {
            is_running: self.is_running(),
            services,
        }
    }

    /// Check every service and reduce to the worst status.
    ///
    /// Publishes `service.health.changed` for services whose status differs
    /// from the previously cached report.
    pub async fn health_check(&self) -> OrchestratorHealth {
        let mut services = BTreeMap::new();

        for descriptor in self.registry.list_services().await {
            let previous = descriptor.health.as_ref().map(|h| h.status);

            // Deregistered between listing and probing.
            let Ok(report) = self.registry.health_check(&descriptor.name).await else {
                continue;
            };

            if previous != Some(report.status) {
                info!(
                    service = %descriptor.name,
                    previous = ?previous,
                    current = %report.status,
                    "Service health changed"
                );
                self.event_bus.emit(
                    event_types::SERVICE_HEALTH_CHANGED,
                    &descriptor.name,
                    EventData::HealthChanged {
                        previous,
                        current: report.status,
                    },
                );
            }

            services.insert(descriptor.name, report);
        }

        let overall = HealthStatus::worst(services.values().map(|r| r.status));
        debug!(overall = %overall, services = services.len(), "Health check completed");

        OrchestratorHealth { overall, services }
    }

    /// Composite snapshot built from cached state only
    pub async fn get_metrics(&self) -> OrchestratorMetrics {
        let uptime_ms = self
            .started_at
            .lock()
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let snapshot = self.registry.snapshot().await;
        let service_registry = self.registry.get_stats().await;

        let services: BTreeMap<String, ServiceMetrics> = snapshot
            .into_iter()
            .map(|(descriptor, service)| {
                let metrics = ServiceMetrics {
                    status: descriptor.status,
                    uptime_ms: descriptor.uptime_ms,
                    health: descriptor.health.as_ref().map(|h| h.status),
                    metrics: service.metrics(),
                };
                (descriptor.name, metrics)
            })
            .collect();

        OrchestratorMetrics {
            orchestrator: OrchestratorSummary {
                uptime_ms,
                services_count: services.len(),
                healthy_services: service_registry.healthy_services,
                is_running: self.is_running(),
            },
            services,
            event_bus: self.event_bus.get_event_stats(),
            service_registry,
            circuit_breakers: self.retry.get_circuit_breaker_stats(None).await,
        }
    }

    /// Run `health_check` every `interval` while running.
    ///
    /// The task ends once the orchestrator is dropped.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = interval.as_secs_f64(), "Started health monitor");

            loop {
                ticker.tick().await;

                let Some(orchestrator) = weak.upgrade() else {
                    debug!("Orchestrator dropped, stopping health monitor");
                    break;
                };

                if orchestrator.is_running() {
                    let health = orchestrator.health_check().await;
                    if health.overall != HealthStatus::Healthy {
                        warn!(overall = %health.overall, "Services not healthy");
                    }
                }
            }
        })
    }

    /// `spawn_health_monitor` with the configured interval
    pub fn spawn_default_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_health_monitor(self.config.health_check_interval())
    }
}
