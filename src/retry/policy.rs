use crate::error::CoreError;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a failed attempt may be retried
pub type RetryCondition = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

/// Called with the 1-based attempt number before a retry is scheduled
pub type RetryHook = Arc<dyn Fn(u32, &CoreError) + Send + Sync>;

/// Retry configuration as loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add uniform random jitter of up to one delay
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Optional backoff ceiling in milliseconds
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Optional per-attempt timeout in milliseconds
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            max_delay_ms: None,
            attempt_timeout_ms: None,
        }
    }
}

/// Per-call retry policy
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Backoff ceiling; `None` lets delays grow without bound
    pub max_delay: Option<Duration>,
    /// Attempts running longer fail with `CoreError::Timeout`
    pub attempt_timeout: Option<Duration>,
    retry_condition: Option<RetryCondition>,
    on_retry: Option<RetryHook>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("max_delay", &self.max_delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("custom_retry_condition", &self.retry_condition.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.jitter,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
            retry_condition: None,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with exact (jitter-free) delays
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            max_delay: None,
            attempt_timeout: None,
            retry_condition: None,
            on_retry: None,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Replace the default `CoreError::is_retryable` classification
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&CoreError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &CoreError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn should_retry(&self, error: &CoreError) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => error.is_retryable(),
        }
    }

    pub(crate) fn notify_retry(&self, attempt: u32, error: &CoreError) {
        if let Some(hook) = &self.on_retry {
            hook(attempt, error);
        }
    }

    /// Fresh schedule of un-jittered delays, starting with the wait before attempt 2
    pub fn backoff_schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(self)
    }

    /// Un-jittered wait before a 1-based attempt: zero for attempt 1,
    /// `base_delay * multiplier^(attempt - 2)` after that.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let mut schedule = self.backoff_schedule();
        let mut delay = Duration::ZERO;
        for _ in 1..attempt {
            delay = schedule.next_delay();
        }
        delay
    }

    /// Apply jitter (if enabled) to a scheduled delay
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_extra = delay.as_millis().min(u64::MAX as u128) as u64;
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        delay.saturating_add(Duration::from_millis(extra))
    }
}

/// Exponential delay sequence backed by `backoff::ExponentialBackoff`.
///
/// Randomization is disabled in the underlying backoff so the sequence is
/// exact at millisecond resolution; jitter is applied separately.
pub struct BackoffSchedule {
    inner: ExponentialBackoff,
}

impl BackoffSchedule {
    fn new(policy: &RetryPolicy) -> Self {
        let mut inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(policy.backoff_multiplier)
            .with_max_interval(policy.max_delay.unwrap_or(Duration::MAX))
            .with_max_elapsed_time(None) // Attempts are bounded by max_attempts
            .build();
        inner.reset();
        Self { inner }
    }

    /// Next un-jittered delay
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .inner
            .next_backoff()
            .unwrap_or(self.inner.max_interval);
        // Drop the sub-millisecond noise the backoff crate adds.
        Duration::from_millis(delay.as_millis().min(u64::MAX as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.jitter);
        assert!(config.max_delay_ms.is_none());
    }

    #[test]
    fn test_schedule_is_exact_without_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut schedule = policy.backoff_schedule();
        let delays: Vec<u64> = (0..4)
            .map(|_| schedule.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80]);
    }

    #[test]
    fn test_delay_before_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).with_backoff_multiplier(3.0);
        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(900));
    }

    #[test]
    fn test_growth_is_uncapped_by_default() {
        let policy = RetryPolicy::new(20, Duration::from_millis(1000));
        assert_eq!(
            policy.delay_before_attempt(12),
            Duration::from_millis(1000 * 1024)
        );
    }

    #[test]
    fn test_ceiling_caps_growth() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250));
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(250));
        assert_eq!(policy.delay_before_attempt(8), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_one_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50)).with_jitter(true);
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(50));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
        let exact = RetryPolicy::new(3, Duration::from_millis(50));
        assert_eq!(exact.jittered(Duration::from_millis(50)), Duration::from_millis(50));
    }

    #[test]
    fn test_custom_retry_condition() {
        let default = RetryPolicy::default();
        assert!(!default.should_retry(&CoreError::NotFound("po".into())));
        assert!(default.should_retry(&CoreError::Timeout("db".into())));

        let everything = RetryPolicy::default().with_retry_condition(|_| true);
        assert!(everything.should_retry(&CoreError::NotFound("po".into())));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 25,
            backoff_multiplier: 0.5,
            jitter: false,
            max_delay_ms: Some(400),
            attempt_timeout_ms: Some(1500),
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(25));
        assert_eq!(policy.backoff_multiplier, 1.0);
        assert_eq!(policy.max_delay, Some(Duration::from_millis(400)));
        assert_eq!(policy.attempt_timeout, Some(Duration::from_millis(1500)));
    }
}
