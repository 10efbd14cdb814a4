pub mod breaker;
pub mod service;
pub mod types;

pub use breaker::CircuitBreaker;
pub use service::CircuitBreakerService;
pub use types::{
    BreakerStats, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, FailureRecord,
};
