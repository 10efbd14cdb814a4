use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, operations flow normally
    Closed,
    /// Circuit is open, operations are rejected
    Open,
    /// Circuit is half-open, allowing trial operations
    HalfOpen,
}

impl CircuitState {
    /// Gauge value used for metrics: 0 = closed, 1 = open, 2 = half-open
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Gate operations through a breaker by default
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time to wait in open state before letting a trial request through
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Circuit breaker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Operations let through
    pub allowed_requests: u64,
    /// Operations rejected while open
    pub rejected_requests: u64,
    /// Recorded successes
    pub successful_requests: u64,
    /// Recorded failures
    pub failed_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
    /// Number of times circuit closed after a trial success or reset
    pub circuit_closed_count: u64,
}

/// Read-only snapshot of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub metrics: CircuitBreakerMetrics,
}

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    /// State after the failure was recorded
    pub state: CircuitState,
    /// Failure count after the failure was recorded
    pub failures: u32,
    /// This failure moved the breaker into `Open`
    pub tripped: bool,
}
