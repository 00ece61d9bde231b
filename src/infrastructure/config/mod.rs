//! Configuration management infrastructure.
//!
//! Hierarchical configuration using `figment`: YAML file loading,
//! environment variable overrides, and typed, validated config structs for
//! every tunable named across the component designs (circuit breaker
//! thresholds, retry policy, pool defaults, execution engine concurrency
//! cap). Loading from disk is something an embedding application does once
//! at startup; the core itself never reaches for a config file.

mod loader;

pub use loader::{
    AppConfig, CircuitBreakerSettings, ConfigError, ConfigLoader, DatabaseSettings,
    ExecutionEngineSettings, PoolSettings, RetrySettings, SagaSettings,
};
