use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle status of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

/// Health of a single service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// 0 = healthy, 1 = degraded, 2 = unhealthy
    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    /// Worst-of reduction. An empty set is healthy.
    pub fn worst<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses
            .into_iter()
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Outcome of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded).with_detail("reason", reason.into())
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).with_detail("reason", reason.into())
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Registry view of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub status: ServiceStatus,
    pub health: Option<HealthReport>,
    pub uptime_ms: Option<u64>,
    pub registered_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Tally of cached health reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub degraded_services: usize,
}

/// A logical service the orchestrator can start, stop and health-check
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Unique service name
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn health_check(&self) -> Result<HealthReport>;

    /// Service-specific metrics for the composite snapshot
    fn metrics(&self) -> Value {
        Value::Object(Default::default())
    }
}
