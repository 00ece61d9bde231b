//! Per-target circuit breaker (§4.1, §8 property 3).
//!
//! One [`Circuit`] per logical target (`"<engine>:<repo>"`), guarded by its
//! own lock so breaker state for one target never blocks another. The
//! registry itself is a sharded map behind an outer lock, taken only long
//! enough to fetch-or-insert the per-target entry — never held across an
//! adapter call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::models::{Circuit, CircuitBreakerConfig, CircuitState};
use crate::services::event_bus::{kind, EventBus};

/// Outcome of [`CircuitBreakerRegistry::before_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// The call may proceed normally.
    Proceed,
    /// The call may proceed as the single admitted half-open probe.
    ProbePermitted,
    /// The call must fail immediately with `CircuitOpen`.
    Refuse {
        /// Seconds remaining before a probe would be admitted.
        retry_after_secs: u64,
    },
}

struct TargetBreaker {
    circuit: Circuit,
    config: CircuitBreakerConfig,
}

/// Process-wide registry of per-target breakers (§9 "no global mutable
/// state" — owned by one explicitly-constructed instance, typically held by
/// the `ResilientAdapter`/`ExecutionEngine`).
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    targets: RwLock<HashMap<String, Arc<RwLock<TargetBreaker>>>>,
    events: EventBus,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `default_config` unless
    /// overridden per-target. Transitions are published to `events` (§6
    /// "breaker.opened|closed|half_open").
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self { default_config, targets: RwLock::new(HashMap::new()), events }
    }

    async fn entry(&self, target_key: &str) -> Arc<RwLock<TargetBreaker>> {
        if let Some(existing) = self.targets.read().await.get(target_key) {
            return existing.clone();
        }
        let mut targets = self.targets.write().await;
        targets
            .entry(target_key.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(TargetBreaker {
                    circuit: Circuit::new(target_key),
                    config: self.default_config,
                }))
            })
            .clone()
    }

    /// Decide whether a call to `target_key` may proceed, transitioning
    /// `open` → `half_open` if the timeout has elapsed. At most one caller
    /// observes [`CircuitDecision::ProbePermitted`] per half-open window:
    /// the transition happens under the per-target lock, and once in
    /// `half_open` every subsequent call before resolution also refuses
    /// (only the call that performed the transition gets to probe).
    pub async fn before_call(&self, target_key: &str) -> CircuitDecision {
        let entry = self.entry(target_key).await;
        let mut guard = entry.write().await;
        let now = Utc::now();

        match guard.circuit.state {
            CircuitState::Closed => CircuitDecision::Proceed,
            CircuitState::HalfOpen => CircuitDecision::Refuse { retry_after_secs: 0 },
            CircuitState::Open => {
                let opened_at = guard.circuit.opened_at.unwrap_or(now);
                let elapsed = (now - opened_at).num_seconds().max(0) as u64;
                let timeout = guard.config.timeout_seconds;
                if elapsed >= timeout {
                    guard.circuit.state = CircuitState::HalfOpen;
                    guard.circuit.consecutive_half_open_successes = 0;
                    info!(target = target_key, "circuit breaker admitting half-open probe");
                    self.events.publish(crate::domain::models::Event::new(
                        kind::BREAKER_HALF_OPEN,
                        target_key,
                        serde_json::json!({}),
                    ));
                    CircuitDecision::ProbePermitted
                } else {
                    CircuitDecision::Refuse { retry_after_secs: timeout - elapsed }
                }
            }
        }
    }

    /// Record a successful call against `target_key` (§4.1).
    pub async fn record_success(&self, target_key: &str) {
        let entry = self.entry(target_key).await;
        let mut guard = entry.write().await;
        match guard.circuit.state {
            CircuitState::Closed => {
                guard.circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                guard.circuit.consecutive_half_open_successes += 1;
                if guard.circuit.consecutive_half_open_successes >= guard.config.success_threshold {
                    guard.circuit.state = CircuitState::Closed;
                    guard.circuit.consecutive_failures = 0;
                    guard.circuit.consecutive_half_open_successes = 0;
                    guard.circuit.opened_at = None;
                    info!(target = target_key, "circuit breaker closed after successful probes");
                    self.events.publish(crate::domain::models::Event::new(
                        kind::BREAKER_CLOSED,
                        target_key,
                        serde_json::json!({}),
                    ));
                }
            }
            CircuitState::Open => {
                // A success can only reach us here if a stale probe resolved
                // after we already refused it; no state change is correct.
            }
        }
    }

    /// Record a failed call against `target_key` (§4.1).
    pub async fn record_failure(&self, target_key: &str) {
        let entry = self.entry(target_key).await;
        let mut guard = entry.write().await;
        let now = Utc::now();
        guard.circuit.last_failure_at = Some(now);

        match guard.circuit.state {
            CircuitState::Closed => {
                guard.circuit.consecutive_failures += 1;
                if guard.circuit.consecutive_failures >= guard.config.failure_threshold {
                    guard.circuit.state = CircuitState::Open;
                    guard.circuit.opened_at = Some(now);
                    warn!(target = target_key, failures = guard.circuit.consecutive_failures, "circuit breaker opened");
                    self.events.publish(crate::domain::models::Event::new(
                        kind::BREAKER_OPENED,
                        target_key,
                        serde_json::json!({ "consecutive_failures": guard.circuit.consecutive_failures }),
                    ));
                }
            }
            CircuitState::HalfOpen => {
                guard.circuit.state = CircuitState::Open;
                guard.circuit.opened_at = Some(now);
                guard.circuit.consecutive_half_open_successes = 0;
                warn!(target = target_key, "circuit breaker re-opened after failed probe");
                self.events.publish(crate::domain::models::Event::new(kind::BREAKER_OPENED, target_key, serde_json::json!({})));
            }
            CircuitState::Open => {}
        }
    }

    /// Snapshot the current state of `target_key` without mutating it.
    /// Targets never seen are reported as a fresh, closed circuit.
    pub async fn get(&self, target_key: &str) -> Circuit {
        let entry = self.entry(target_key).await;
        entry.read().await.circuit.clone()
    }

    /// Reset `target_key` to `closed` with counters cleared (operator escape
    /// hatch ahead of an explicit DLQ replay, per §9 open question).
    pub async fn reset(&self, target_key: &str) {
        let entry = self.entry(target_key).await;
        let mut guard = entry.write().await;
        guard.circuit = Circuit::new(target_key);
        info!(target = target_key, "circuit breaker reset");
    }
}

/// Compose a breaker target key from an engine name and repo path (§3, §4.1).
#[must_use]
pub fn target_key(engine: &str, repo: &str) -> String {
    format!("{engine}:{repo}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold: 3, timeout_seconds: 0, success_threshold: 2 }
    }

    fn registry(config: CircuitBreakerConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(config, EventBus::new(32))
    }

    #[tokio::test]
    async fn closed_breaker_admits_calls() {
        let registry = registry(config());
        assert_eq!(registry.before_call("e:/r").await, CircuitDecision::Proceed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_reach_threshold() {
        let registry = registry(config());
        for _ in 0..3 {
            registry.record_failure("e:/r").await;
        }
        let circuit = registry.get("e:/r").await;
        assert_eq!(circuit.state, CircuitState::Open);
        assert!(circuit.opened_at.is_some());
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_failure_counter() {
        let registry = registry(config());
        registry.record_failure("e:/r").await;
        registry.record_failure("e:/r").await;
        registry.record_success("e:/r").await;
        assert_eq!(registry.get("e:/r").await.consecutive_failures, 0);
        registry.record_failure("e:/r").await;
        registry.record_failure("e:/r").await;
        assert_eq!(registry.get("e:/r").await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe_then_refuses() {
        let registry = registry(config());
        for _ in 0..3 {
            registry.record_failure("e:/r").await;
        }
        // timeout_seconds = 0, so the very next call transitions to half_open.
        assert_eq!(registry.before_call("e:/r").await, CircuitDecision::ProbePermitted);
        assert_eq!(registry.before_call("e:/r").await, CircuitDecision::Refuse { retry_after_secs: 0 });
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold_probes() {
        let registry = registry(config());
        for _ in 0..3 {
            registry.record_failure("e:/r").await;
        }
        registry.before_call("e:/r").await;
        registry.record_success("e:/r").await;
        assert_eq!(registry.get("e:/r").await.state, CircuitState::HalfOpen);
        registry.record_success("e:/r").await;
        assert_eq!(registry.get("e:/r").await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let registry = registry(config());
        for _ in 0..3 {
            registry.record_failure("e:/r").await;
        }
        registry.before_call("e:/r").await;
        registry.record_failure("e:/r").await;
        assert_eq!(registry.get("e:/r").await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_refuses_until_timeout_elapses() {
        let registry = registry(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_seconds: 60,
            success_threshold: 1,
        });
        registry.record_failure("e:/r").await;
        let decision = registry.before_call("e:/r").await;
        assert!(matches!(decision, CircuitDecision::Refuse { retry_after_secs } if retry_after_secs > 0));
        tokio::time::sleep(StdDuration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn different_targets_do_not_share_state() {
        let registry = registry(config());
        for _ in 0..3 {
            registry.record_failure("e:/a").await;
        }
        assert_eq!(registry.get("e:/a").await.state, CircuitState::Open);
        assert_eq!(registry.get("e:/b").await.state, CircuitState::Closed);
    }

    #[test]
    fn target_key_composes_engine_and_repo() {
        assert_eq!(target_key("prefect", "/r/a"), "prefect:/r/a");
    }
}
