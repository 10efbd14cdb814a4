use super::policy::RetryPolicy;
use crate::circuit_breaker::{
    BreakerStats, CircuitBreakerConfig, CircuitBreakerService, CircuitState,
};
use crate::error::{CoreError, Result};
use crate::events::{event_types, EventBus, EventData};
use crate::metrics::{self, OperationTimer};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifies an operation for breaker keying and logging
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationContext {
    pub service: String,
    pub operation: String,
}

impl OperationContext {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Circuit breaker key, `service:operation`
    pub fn key(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Runs fallible async operations with bounded retries, exponential backoff
/// and optional per-key circuit breaking.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breakers: CircuitBreakerService,
    default_policy: RetryPolicy,
    default_breaker: Option<CircuitBreakerConfig>,
    event_bus: Option<EventBus>,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(breakers: CircuitBreakerService, default_policy: RetryPolicy) -> Self {
        Self {
            breakers,
            default_policy,
            default_breaker: None,
            event_bus: None,
        }
    }

    /// Gate `execute` and wrapped methods through a breaker by default
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.default_breaker = config.enabled.then_some(config);
        self
    }

    /// Publish `circuit.opened` and `retry.exhausted` events on this bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerService {
        &self.breakers
    }

    /// Execute with the default policy and default breaker
    pub async fn execute<F, Fut, T>(&self, operation: F, context: &OperationContext) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_retry(
            operation,
            context,
            &self.default_policy,
            self.default_breaker.as_ref(),
        )
        .await
    }

    /// Execute an operation with retries.
    ///
    /// With a breaker policy, an open circuit for `service:operation` rejects
    /// the call with `CoreError::CircuitOpen` before any attempt is made.
    /// Non-retryable errors return immediately. Once attempts are exhausted,
    /// or a failure opens the circuit, the last error is returned.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        context: &OperationContext,
        policy: &RetryPolicy,
        breaker: Option<&CircuitBreakerConfig>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = context.key();

        if let Some(cb) = breaker {
            if !self.breakers.allow(&key, cb).await {
                debug!(key = %key, "Circuit breaker open, rejecting operation");
                metrics::record_circuit_breaker_rejection(&key);
                return Err(CoreError::CircuitOpen(key));
            }
        }

        let timer = OperationTimer::new(&context.service, &context.operation);
        let max_attempts = policy.max_attempts.max(1);
        let mut schedule = policy.backoff_schedule();
        let mut attempt: u32 = 1;

        loop {
            debug!(
                service = %context.service,
                operation = %context.operation,
                attempt,
                max_attempts,
                "Executing operation"
            );

            let error = match self.run_attempt(&mut operation, context, policy).await {
                Ok(result) => {
                    if breaker.is_some() {
                        self.breakers.record_success(&key).await;
                    }
                    if attempt > 1 {
                        debug!(key = %key, attempt, "Operation succeeded after retries");
                    }
                    timer.record("success");
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !policy.should_retry(&error) {
                debug!(key = %key, attempt, error = %error, "Error not retryable");
                timer.record("rejected");
                return Err(error);
            }

            let circuit_open = match breaker {
                Some(cb) => {
                    self.record_breaker_failure(&key, &context.service, cb).await
                        == CircuitState::Open
                }
                None => false,
            };

            if attempt >= max_attempts || circuit_open {
                warn!(
                    key = %key,
                    attempt,
                    max_attempts,
                    circuit_open,
                    error = %error,
                    "Operation failed after retries"
                );
                self.publish(
                    event_types::RETRY_EXHAUSTED,
                    &context.service,
                    EventData::RetryExhausted {
                        key: key.clone(),
                        attempts: attempt,
                        error: error.to_string(),
                    },
                );
                timer.record("failure");
                return Err(error);
            }

            policy.notify_retry(attempt, &error);
            metrics::record_retry_attempt(&context.service, &context.operation);

            let wait = policy.jittered(schedule.next_delay());
            debug!(
                key = %key,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Operation failed, retrying after backoff"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    /// Wrap `f` so every call runs through `execute_with_retry`.
    ///
    /// The arguments (for example a caller context plus an entity id) are
    /// passed to `f` unchanged on every attempt.
    pub fn wrap_service_method<A, F, Fut, T>(
        self: &Arc<Self>,
        service: impl Into<String>,
        operation: impl Into<String>,
        f: F,
        policy: Option<RetryPolicy>,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T>> + Send + Sync + 'static
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let executor = Arc::clone(self);
        let context = OperationContext::new(service, operation);
        let policy = policy.unwrap_or_else(|| executor.default_policy.clone());
        let f = Arc::new(f);

        move |args: A| -> BoxFuture<'static, Result<T>> {
            let executor = executor.clone();
            let context = context.clone();
            let policy = policy.clone();
            let f = f.clone();

            Box::pin(async move {
                let breaker = executor.default_breaker.clone();
                executor
                    .execute_with_retry(|| f(args.clone()), &context, &policy, breaker.as_ref())
                    .await
            })
        }
    }

    /// Breaker snapshots, for one key or all of them
    pub async fn get_circuit_breaker_stats(
        &self,
        key: Option<&str>,
    ) -> BTreeMap<String, BreakerStats> {
        match key {
            Some(key) => self
                .breakers
                .stats_for(key)
                .await
                .map(|stats| BTreeMap::from([(key.to_string(), stats)]))
                .unwrap_or_default(),
            None => self.breakers.stats().await,
        }
    }

    /// Force a breaker closed; false for an unknown key
    pub async fn reset_circuit_breaker(&self, key: &str) -> bool {
        self.breakers.reset(key).await
    }

    async fn run_attempt<F, Fut, T>(
        &self,
        operation: &mut F,
        context: &OperationContext,
        policy: &RetryPolicy,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout(format!(
                    "{} exceeded {}ms",
                    context.key(),
                    limit.as_millis()
                ))),
            },
            None => operation().await,
        }
    }

    async fn record_breaker_failure(
        &self,
        key: &str,
        service: &str,
        config: &CircuitBreakerConfig,
    ) -> CircuitState {
        let record = self.breakers.record_failure(key, config).await;
        if record.tripped {
            self.publish(
                event_types::CIRCUIT_OPENED,
                service,
                EventData::CircuitOpened {
                    key: key.to_string(),
                    failures: record.failures,
                },
            );
        }
        record.state
    }

    fn publish(&self, event_type: &str, service: &str, data: EventData) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event_type, service, data);
        }
    }
}
