//! Circuit breaker domain model (state only; transitions live in
//! `services::circuit_breaker`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three states a breaker moves through (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail immediately with `CircuitOpen`.
    Open,
    /// A single probe call is admitted.
    HalfOpen,
}

/// Tunables for a breaker instance. Defaults mirror §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `closed` before tripping to `open`.
    pub failure_threshold: u32,
    /// Seconds to wait in `open` before admitting a half-open probe.
    pub timeout_seconds: u64,
    /// Consecutive half-open successes required to close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, timeout_seconds: 60, success_threshold: 2 }
    }
}

/// Snapshot of one breaker's state, keyed by `target_key` (e.g. `"<engine>:<repo>"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// The logical target this breaker guards.
    pub target_key: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed in `closed`/`open`.
    pub consecutive_failures: u32,
    /// Consecutive successes observed while `half_open`.
    pub consecutive_half_open_successes: u32,
    /// When the breaker last transitioned to `open`.
    pub opened_at: Option<DateTime<Utc>>,
    /// When the last failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl Circuit {
    /// A freshly-created, closed breaker for `target_key`.
    #[must_use]
    pub fn new(target_key: impl Into<String>) -> Self {
        Self {
            target_key: target_key.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_half_open_successes: 0,
            opened_at: None,
            last_failure_at: None,
        }
    }
}
