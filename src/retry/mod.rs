pub mod executor;
pub mod policy;

pub use executor::{OperationContext, RetryExecutor};
pub use policy::{BackoffSchedule, RetryCondition, RetryConfig, RetryHook, RetryPolicy};
