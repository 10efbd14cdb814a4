use crate::circuit_breaker::BreakerStats;
use crate::events::EventStats;
use crate::registry::{HealthReport, HealthStatus, RegistryStats, ServiceStatus};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A service that failed a lifecycle step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    pub name: String,
    pub error: String,
}

/// Result of `Orchestrator::start`; partial startup is reported, not fatal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub started: Vec<String>,
    pub failed: Vec<ServiceFailure>,
}

impl StartupReport {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Result of `Orchestrator::stop`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub failed: Vec<ServiceFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusEntry {
    pub name: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub services: Vec<ServiceStatusEntry>,
}

/// Aggregate health; `overall` is the worst service status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorHealth {
    pub overall: HealthStatus,
    pub services: BTreeMap<String, HealthReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorSummary {
    pub uptime_ms: u64,
    pub services_count: usize,
    pub healthy_services: usize,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub status: ServiceStatus,
    pub uptime_ms: Option<u64>,
    pub health: Option<HealthStatus>,
    pub metrics: Value,
}

/// Composite read-only snapshot
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub orchestrator: OrchestratorSummary,
    pub services: BTreeMap<String, ServiceMetrics>,
    pub event_bus: EventStats,
    pub service_registry: RegistryStats,
    pub circuit_breakers: BTreeMap<String, BreakerStats>,
}
