pub mod types;

pub use types::{
    HealthReport, HealthStatus, ManagedService, RegistryStats, ServiceDescriptor, ServiceStatus,
};

use crate::error::{CoreError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Directory of logical services and their last-known health.
///
/// Services are kept in registration order; the orchestrator starts them in
/// that order and stops them in reverse.
pub struct ServiceRegistry {
    entries: RwLock<Vec<Entry>>,
    health_check_timeout: Duration,
}

struct Entry {
    service: Arc<dyn ManagedService>,
    name: String,
    status: ServiceStatus,
    health: Option<HealthReport>,
    registered_at: DateTime<Utc>,
    started_at: Option<Instant>,
    last_error: Option<String>,
}

impl Entry {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.name.clone(),
            status: self.status,
            health: self.health.clone(),
            uptime_ms: self.started_at.map(|at| at.elapsed().as_millis() as u64),
            registered_at: self.registered_at,
            last_error: self.last_error.clone(),
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("health_check_timeout", &self.health_check_timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(health_check_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            health_check_timeout,
        }
    }

    /// Register a service under its name. Names are unique.
    pub async fn register(&self, service: Arc<dyn ManagedService>) -> Result<ServiceDescriptor> {
        let name = service.name().to_string();
        let mut entries = self.entries.write().await;

        if entries.iter().any(|e| e.name == name) {
            return Err(CoreError::AlreadyRegistered(name));
        }

        let entry = Entry {
            service,
            name: name.clone(),
            status: ServiceStatus::Stopped,
            health: None,
            registered_at: Utc::now(),
            started_at: None,
            last_error: None,
        };
        let descriptor = entry.descriptor();
        entries.push(entry);

        info!(service = %name, "Service registered");
        Ok(descriptor)
    }

    /// Remove a service. Returns false if it was not registered.
    pub async fn deregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.name != name);

        let removed = entries.len() != before;
        if removed {
            info!(service = %name, "Service deregistered");
        }
        removed
    }

    /// Look up a service by name
    pub async fn discover(&self, name: &str) -> Result<ServiceDescriptor> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.name == name)
            .map(Entry::descriptor)
            .ok_or_else(|| CoreError::NotFound(format!("service '{}'", name)))
    }

    /// All services in registration order
    pub async fn list_services(&self) -> Vec<ServiceDescriptor> {
        self.entries.read().await.iter().map(Entry::descriptor).collect()
    }

    /// Check a service and cache the report.
    ///
    /// A check that errors or exceeds the health check timeout is cached as
    /// `unhealthy` with the cause in `details`.
    pub async fn health_check(&self, name: &str) -> Result<HealthReport> {
        let service = self
            .handle(name)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("service '{}'", name)))?;

        let report = match tokio::time::timeout(self.health_check_timeout, service.health_check())
            .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(service = %name, error = %e, "Health check failed");
                HealthReport::unhealthy(e.to_string())
            }
            Err(_) => {
                warn!(
                    service = %name,
                    timeout_ms = self.health_check_timeout.as_millis() as u64,
                    "Health check timed out"
                );
                HealthReport::unhealthy("health check timed out")
                    .with_detail("timeout_ms", self.health_check_timeout.as_millis() as u64)
            }
        };

        debug!(service = %name, status = %report.status, "Health check completed");
        metrics::record_service_health(name, report.status);

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.health = Some(report.clone());
        }

        Ok(report)
    }

    /// Last cached report, without probing
    pub async fn cached_health(&self, name: &str) -> Option<HealthReport> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.health.clone())
    }

    /// Tally of cached health reports
    pub async fn get_stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut stats = RegistryStats {
            total_services: entries.len(),
            ..Default::default()
        };

        for report in entries.iter().filter_map(|e| e.health.as_ref()) {
            match report.status {
                HealthStatus::Healthy => stats.healthy_services += 1,
                HealthStatus::Degraded => stats.degraded_services += 1,
                HealthStatus::Unhealthy => stats.unhealthy_services += 1,
            }
        }

        stats
    }

    /// Number of registered services
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn handle(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.service.clone())
    }

    /// Service handles with their descriptors, in registration order
    pub(crate) async fn snapshot(&self) -> Vec<(ServiceDescriptor, Arc<dyn ManagedService>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| (e.descriptor(), e.service.clone()))
            .collect()
    }

    /// Update lifecycle status. Running services start accruing uptime.
    pub(crate) async fn set_status(&self, name: &str, status: ServiceStatus, error: Option<String>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.status = status;
            entry.started_at = match status {
                ServiceStatus::Running => Some(Instant::now()),
                ServiceStatus::Stopped | ServiceStatus::Error => None,
            };
            if error.is_some() || status == ServiceStatus::Running {
                entry.last_error = error;
            }
        }
    }
}
