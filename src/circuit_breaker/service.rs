use super::breaker::CircuitBreaker;
use super::types::{BreakerStats, CircuitBreakerConfig, CircuitState, FailureRecord};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Circuit breakers keyed by `service:operation`.
///
/// Breakers are created lazily on first use and live as long as the service.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerService {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerService {
    /// Create a new circuit breaker service
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a circuit breaker for a key
    fn get_or_create_breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key)))
            .clone()
    }

    fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|entry| entry.value().clone())
    }

    /// Check if an operation may proceed for a key
    pub async fn allow(&self, key: &str, config: &CircuitBreakerConfig) -> bool {
        let breaker = self.get_or_create_breaker(key);
        breaker.allow(config.reset_timeout()).await
    }

    /// Record a successful operation for a key
    pub async fn record_success(&self, key: &str) {
        let breaker = self.get_or_create_breaker(key);
        breaker.record_success().await;
    }

    /// Record a failed operation for a key
    pub async fn record_failure(&self, key: &str, config: &CircuitBreakerConfig) -> FailureRecord {
        let breaker = self.get_or_create_breaker(key);
        breaker.record_failure(config.failure_threshold).await
    }

    /// Force a breaker closed. Returns false for an unknown key.
    pub async fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }

    /// State of the breaker for a key; unknown keys report `Closed`
    pub async fn state(&self, key: &str) -> CircuitState {
        match self.get(key) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    /// Snapshot of a single breaker
    pub async fn stats_for(&self, key: &str) -> Option<BreakerStats> {
        match self.get(key) {
            Some(breaker) => Some(breaker.stats().await),
            None => None,
        }
    }

    /// Snapshot of every breaker
    pub async fn stats(&self) -> BTreeMap<String, BreakerStats> {
        // Collect handles first so no map shard is held across an await.
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut results = BTreeMap::new();
        for breaker in breakers {
            results.insert(breaker.key().to_string(), breaker.stats().await);
        }
        results
    }

    /// All keys with a breaker
    pub fn keys(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_service_manages_multiple_keys() {
        let service = CircuitBreakerService::new();
        let cfg = config(2);

        assert!(service.allow("po:create", &cfg).await);
        service.record_success("po:create").await;

        assert!(service.allow("vendor:sync", &cfg).await);
        service.record_failure("vendor:sync", &cfg).await;
        assert!(service.allow("vendor:sync", &cfg).await);
        service.record_failure("vendor:sync", &cfg).await;

        assert_eq!(service.state("po:create").await, CircuitState::Closed);
        assert_eq!(service.state("vendor:sync").await, CircuitState::Open);

        let keys = service.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"po:create".to_string()));
        assert!(keys.contains(&"vendor:sync".to_string()));
    }

    #[tokio::test]
    async fn test_service_stats() {
        let service = CircuitBreakerService::new();
        let cfg = config(2);

        service.record_success("po:create").await;
        service.record_failure("vendor:sync", &cfg).await;

        let stats = service.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["po:create"].metrics.successful_requests, 1);
        assert_eq!(stats["vendor:sync"].failures, 1);
        assert_eq!(stats["vendor:sync"].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_known_and_unknown_key() {
        let service = CircuitBreakerService::new();
        let cfg = config(1);

        service.record_failure("po:approve", &cfg).await;
        assert_eq!(service.state("po:approve").await, CircuitState::Open);

        assert!(service.reset("po:approve").await);
        let stats = service.stats_for("po:approve").await.unwrap();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failures, 0);

        assert!(!service.reset("missing:key").await);
    }

    #[tokio::test]
    async fn test_service_nonexistent_key() {
        let service = CircuitBreakerService::new();

        assert_eq!(service.state("nonexistent").await, CircuitState::Closed);
        assert!(service.stats_for("nonexistent").await.is_none());
        assert!(service.stats().await.is_empty());
    }
}
