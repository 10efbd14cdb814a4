use super::types::{BreakerStats, CircuitBreakerMetrics, CircuitState, FailureRecord};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker for a single `service:operation` key
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Key this breaker guards
    key: String,
    /// Current state
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Consecutive failures since the last success or reset
    failure_count: u32,
    /// Time of the failure that last opened (or re-opened) the circuit
    last_failure: Option<Instant>,
    /// Wall-clock twin of `last_failure` for reporting
    last_failure_at: Option<DateTime<Utc>>,
    /// Counters
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(key = %key, "Creating circuit breaker");

        Self {
            key,
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check if an operation may proceed.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// lets the caller through as a trial request.
    pub async fn allow(&self, reset_timeout: Duration) -> bool {
        let mut state = self.state.write().await;

        match state.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => {
                state.metrics.allowed_requests += 1;
                true
            }
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(reset_timeout);

                if elapsed >= reset_timeout {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.metrics.circuit_half_opened_count += 1;
                    state.metrics.allowed_requests += 1;
                    true
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        key = %self.key,
                        time_remaining = ?reset_timeout - elapsed,
                        "Circuit breaker open, rejecting operation"
                    );
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(key = %self.key, "Half-open trial succeeded");
                state.failure_count = 0;
                self.transition(&mut state, CircuitState::Closed);
                state.metrics.circuit_closed_count += 1;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                debug!(key = %self.key, "Recording success in open state");
            }
        }
    }

    /// Record a failed operation against `failure_threshold`
    pub async fn record_failure(&self, failure_threshold: u32) -> FailureRecord {
        let mut state = self.state.write().await;
        state.metrics.failed_requests += 1;
        state.failure_count = state.failure_count.saturating_add(1);

        let tripped = match state.circuit_state {
            CircuitState::Closed => {
                debug!(
                    key = %self.key,
                    failures = state.failure_count,
                    threshold = failure_threshold,
                    "Operation failed in closed state"
                );

                if state.failure_count >= failure_threshold {
                    self.open(&mut state);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                warn!(key = %self.key, "Half-open trial failed, reopening circuit");
                self.open(&mut state);
                true
            }
            CircuitState::Open => {
                state.last_failure = Some(Instant::now());
                state.last_failure_at = Some(Utc::now());
                false
            }
        };

        FailureRecord {
            state: state.circuit_state,
            failures: state.failure_count,
            tripped,
        }
    }

    /// Force the circuit closed and clear the failure count
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.failure_count = 0;
        state.last_failure = None;
        if state.circuit_state != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed);
            state.metrics.circuit_closed_count += 1;
        }
        info!(key = %self.key, "Circuit breaker reset");
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Snapshot of state, failure count and counters
    pub async fn stats(&self) -> BreakerStats {
        let state = self.state.read().await;
        BreakerStats {
            state: state.circuit_state,
            failures: state.failure_count,
            last_failure_at: state.last_failure_at,
            metrics: state.metrics.clone(),
        }
    }

    fn open(&self, state: &mut State) {
        info!(
            key = %self.key,
            failures = state.failure_count,
            "Circuit breaker opening"
        );
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        state.metrics.circuit_opened_count += 1;
        self.transition(state, CircuitState::Open);
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.circuit_state;
        if from == to {
            return;
        }
        state.circuit_state = to;
        if to == CircuitState::HalfOpen {
            info!(key = %self.key, "Circuit breaker transitioning to half-open");
        }
        metrics::record_circuit_breaker_state(&self.key, to);
        metrics::record_circuit_breaker_transition(&self.key, from, to);
    }
}
