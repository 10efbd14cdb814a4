use crate::registry::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Event types published by the core itself
pub mod event_types {
    pub const ORCHESTRATOR_STARTED: &str = "orchestrator.started";
    pub const ORCHESTRATOR_STOPPED: &str = "orchestrator.stopped";
    pub const SERVICE_STARTED: &str = "service.started";
    pub const SERVICE_STOPPED: &str = "service.stopped";
    pub const SERVICE_FAILED: &str = "service.failed";
    pub const SERVICE_HEALTH_CHANGED: &str = "service.health.changed";
    pub const CIRCUIT_OPENED: &str = "circuit.opened";
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";
}

/// An immutable notification.
///
/// `event_type` is dot-namespaced (`po.status.changed`); the payload is opaque
/// to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P = EventData> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub service: String,
    pub data: P,
    pub timestamp: DateTime<Utc>,
}

impl<P> Event<P> {
    pub fn new(event_type: impl Into<String>, service: impl Into<String>, data: P) -> Self {
        Self::at(event_type, service, data, Utc::now())
    }

    pub fn at(
        event_type: impl Into<String>,
        service: impl Into<String>,
        data: P,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            service: service.into(),
            data,
            timestamp,
        }
    }
}

/// Known event payloads, with `Custom` for anything the core does not model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    StatusChanged {
        entity_id: String,
        from: String,
        to: String,
    },
    ServiceStarted,
    ServiceStopped,
    ServiceFailed {
        error: String,
    },
    HealthChanged {
        previous: Option<HealthStatus>,
        current: HealthStatus,
    },
    CircuitOpened {
        key: String,
        failures: u32,
    },
    RetryExhausted {
        key: String,
        attempts: u32,
        error: String,
    },
    OrchestratorStarted {
        started: usize,
        failed: usize,
    },
    OrchestratorStopped {
        stopped: usize,
    },
    Custom {
        payload: Value,
    },
}

/// Snapshot returned by `EventBus::get_event_stats`
#[derive(Debug, Clone, Serialize)]
pub struct EventStats<P = EventData> {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub recent_events: Vec<Event<P>>,
    /// Events per minute over the span covered by `recent_events`
    pub event_rate: f64,
}

/// A single live subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub event_type: String,
    pub subscribed_at: DateTime<Utc>,
}

/// Snapshot returned by `EventBus::get_subscription_stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub total_subscriptions: usize,
    pub subscriptions_by_event_type: BTreeMap<String, usize>,
    pub subscriptions: Vec<SubscriptionInfo>,
}
