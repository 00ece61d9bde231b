use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::CircuitBreakerConfig;
use crate::services::execution_engine::ExecutionEngineConfig;
use crate::services::retry_executor::RetryConfig;
use crate::services::saga_coordinator::SagaCoordinatorConfig;

use crate::domain::models::PoolConfig;
use crate::infrastructure::logging::LogConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid failure_threshold: {0}, must be at least 1")]
    InvalidFailureThreshold(u32),
    #[error("invalid max_attempts: {0}, must be at least 1")]
    InvalidMaxAttempts(u32),
    #[error("invalid pool bounds: min_workers ({0}) must be <= max_workers ({1})")]
    InvalidPoolBounds(usize, usize),
    #[error("invalid default_max_concurrency: {0}, must be at least 1")]
    InvalidConcurrency(usize),
    #[error("database path cannot be empty")]
    EmptyDatabasePath,
    #[error("invalid log level: {0}, must be one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Database tunables, serialized form of what `adapters::sqlite` needs to
/// open a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: default_max_connections() }
    }
}

fn default_database_path() -> String {
    ".mahavishnu/mahavishnu.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Serialized mirror of [`CircuitBreakerConfig`] (§4.1 defaults).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let d = CircuitBreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            timeout_seconds: d.timeout_seconds,
            success_threshold: d.success_threshold,
        }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            timeout_seconds: s.timeout_seconds,
            success_threshold: s.success_threshold,
        }
    }
}

/// Serialized mirror of [`RetryConfig`] (§4.2 defaults). `Duration` fields
/// are expressed in milliseconds on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = RetryConfig::default();
        Self {
            max_attempts: d.max_attempts,
            base_delay_ms: u64::try_from(d.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(d.max_delay.as_millis()).unwrap_or(u64::MAX),
            jitter: d.jitter,
        }
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter,
        }
    }
}

/// Serialized mirror of [`PoolConfig`] (§4.7 defaults).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub health_interval_secs: u64,
    pub spawn_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
    pub max_consecutive_health_failures: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let d = PoolConfig::default();
        Self {
            min_workers: d.min_workers,
            max_workers: d.max_workers,
            scale_up_threshold: d.scale_up_threshold,
            scale_down_threshold: d.scale_down_threshold,
            health_interval_secs: d.health_interval.as_secs(),
            spawn_timeout_secs: d.spawn_timeout.as_secs(),
            graceful_shutdown_timeout_secs: d.graceful_shutdown_timeout.as_secs(),
            max_consecutive_health_failures: d.max_consecutive_health_failures,
        }
    }
}

impl From<PoolSettings> for PoolConfig {
    fn from(s: PoolSettings) -> Self {
        Self {
            min_workers: s.min_workers,
            max_workers: s.max_workers,
            scale_up_threshold: s.scale_up_threshold,
            scale_down_threshold: s.scale_down_threshold,
            health_interval: Duration::from_secs(s.health_interval_secs),
            spawn_timeout: Duration::from_secs(s.spawn_timeout_secs),
            graceful_shutdown_timeout: Duration::from_secs(s.graceful_shutdown_timeout_secs),
            max_consecutive_health_failures: s.max_consecutive_health_failures,
        }
    }
}

/// Serialized mirror of [`ExecutionEngineConfig`] (§5 defaults).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionEngineSettings {
    pub default_max_concurrency: usize,
    pub cancellation_grace_period_secs: u64,
}

impl Default for ExecutionEngineSettings {
    fn default() -> Self {
        let d = ExecutionEngineConfig::default();
        Self {
            default_max_concurrency: d.default_max_concurrency,
            cancellation_grace_period_secs: d.cancellation_grace_period.as_secs(),
        }
    }
}

impl From<ExecutionEngineSettings> for ExecutionEngineConfig {
    fn from(s: ExecutionEngineSettings) -> Self {
        Self {
            default_max_concurrency: s.default_max_concurrency,
            cancellation_grace_period: Duration::from_secs(s.cancellation_grace_period_secs),
        }
    }
}

/// Serialized mirror of [`SagaCoordinatorConfig`] (§4.8 defaults).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SagaSettings {
    pub retry: RetrySettings,
    pub orphan_threshold_secs: u64,
}

impl Default for SagaSettings {
    fn default() -> Self {
        let d = SagaCoordinatorConfig::default();
        Self { retry: RetrySettings::default(), orphan_threshold_secs: d.orphan_threshold.as_secs() }
    }
}

impl From<SagaSettings> for SagaCoordinatorConfig {
    fn from(s: SagaSettings) -> Self {
        Self { retry: s.retry.into(), orphan_threshold: Duration::from_secs(s.orphan_threshold_secs) }
    }
}

/// Top-level configuration for an embedding application. The core never
/// loads this itself (§10 "the core only needs the typed struct and its
/// defaults"); this is what a CLI, service wrapper, or test harness
/// constructs once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub execution_engine: ExecutionEngineSettings,
    #[serde(default)]
    pub saga: SagaSettings,
}

/// Loads [`AppConfig`] with hierarchical merging via `figment`.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.mahavishnu/config.yaml` (project config)
    /// 3. `.mahavishnu/local.yaml` (optional local overrides)
    /// 4. Environment variables (`MAHAVISHNU_` prefix, `__` nested separator)
    pub fn load() -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(".mahavishnu/config.yaml"))
            .merge(Yaml::file(".mahavishnu/local.yaml"))
            .merge(Env::prefixed("MAHAVISHNU_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(0));
        }
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        if config.pool.min_workers > config.pool.max_workers {
            return Err(ConfigError::InvalidPoolBounds(config.pool.min_workers, config.pool.max_workers));
        }
        if config.execution_engine.default_max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
        assert_eq!(config.database.path, ".mahavishnu/mahavishnu.db");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.pool.min_workers, 1);
        assert_eq!(config.execution_engine.default_max_concurrency, 8);
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let mut config = AppConfig::default();
        config.pool.min_workers = 10;
        config.pool.max_workers = 2;
        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(ConfigError::InvalidPoolBounds(10, 2))));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let mut config = AppConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let yaml = r"
pool:
  min_workers: 2
  max_workers: 2
  scale_up_threshold: 0.8
  scale_down_threshold: 0.2
  health_interval_secs: 5
  spawn_timeout_secs: 30
  graceful_shutdown_timeout_secs: 15
  max_consecutive_health_failures: 3
";
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.pool.min_workers, 2);
        assert_eq!(config.pool.max_workers, 2);
        assert_eq!(config.retry.max_attempts, 3, "untouched sections keep their defaults");
    }

    #[test]
    fn settings_convert_into_service_configs() {
        let settings = CircuitBreakerSettings::default();
        let cfg: CircuitBreakerConfig = settings.into();
        assert_eq!(cfg.failure_threshold, 5);

        let retry_settings = RetrySettings::default();
        let retry_cfg: RetryConfig = retry_settings.into();
        assert_eq!(retry_cfg.max_attempts, 3);
        assert_eq!(retry_cfg.base_delay, Duration::from_secs(1));
    }
}
