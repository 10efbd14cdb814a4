use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{CoreError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the resilience core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Default circuit breaker policy
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Event bus configuration
    #[serde(default)]
    pub event_bus: EventBusConfig,
    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Admin HTTP surface
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Number of recent events kept in history
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between background health checks in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// Timeout for a single service health check in milliseconds
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_ms: u64,
    /// Attempts made to start each service
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
}

/// Admin HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Serve the admin endpoints
    #[serde(default)]
    pub enabled: bool,
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_log_filter() -> String {
    "procurement_core=info".to_string()
}

fn default_history_size() -> usize {
    100
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_health_check_timeout() -> u64 {
    5000
}

fn default_start_attempts() -> u32 {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            health_check_timeout_ms: default_health_check_timeout(),
            start_attempts: default_start_attempts(),
        }
    }
}

impl OrchestratorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AdminConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CoreConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(CoreError::Config(format!(
                "retry.backoff_multiplier must be >= 1, got {}",
                retry.backoff_multiplier
            )));
        }
        if let Some(max_delay_ms) = retry.max_delay_ms {
            if max_delay_ms < retry.base_delay_ms {
                return Err(CoreError::Config(format!(
                    "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                    max_delay_ms, retry.base_delay_ms
                )));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CoreError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.event_bus.history_size == 0 {
            return Err(CoreError::Config(
                "event_bus.history_size must be at least 1".to_string(),
            ));
        }

        if self.orchestrator.start_attempts == 0 {
            return Err(CoreError::Config(
                "orchestrator.start_attempts must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.health_check_interval_secs == 0 {
            return Err(CoreError::Config(
                "orchestrator.health_check_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
logging:
  filter: "procurement_core=debug"
  format: json

retry:
  max_attempts: 5
  base_delay_ms: 250
  backoff_multiplier: 1.5
  jitter: false
  max_delay_ms: 4000

circuit_breaker:
  failure_threshold: 3
  reset_timeout_ms: 10000

event_bus:
  history_size: 50

orchestrator:
  health_check_interval_secs: 10
  start_attempts: 2

admin:
  enabled: true
  port: 9191
"#;

        let config = CoreConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_delay_ms, Some(4000));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.event_bus.history_size, 50);
        assert_eq!(config.orchestrator.start_attempts, 2);
        assert!(config.admin.enabled);
        assert_eq!(config.admin.bind_address(), "127.0.0.1:9191");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = CoreConfig::from_yaml("{}").unwrap();
        assert_eq!(config.logging.filter, "procurement_core=info");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, None);
        assert!(config.circuit_breaker.enabled);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.event_bus.history_size, 100);
        assert_eq!(config.orchestrator.health_check_timeout_ms, 5000);
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = CoreConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = CoreConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ceiling_below_base() {
        let mut config = CoreConfig::default();
        config.retry.base_delay_ms = 500;
        config.retry.max_delay_ms = Some(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_history() {
        let mut config = CoreConfig::default();
        config.event_bus.history_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "circuit_breaker:\n  failure_threshold: 7").unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
    }

    #[test]
    fn test_from_missing_file() {
        let err = CoreConfig::from_file("/nonexistent/procurement.yaml").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
