//! Engine adapter contract (§4.4).
//!
//! An adapter is the only component that speaks to an external execution
//! engine; the Execution Engine, Worker Pool Manager and Resilient Adapter
//! all speak only to this trait. Concrete adapters (LlamaIndex, Prefect,
//! Agno, …) live outside the core; only the contract and an in-tree mock
//! implementation used for tests are specified here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{RepoPath, Task};

/// Coarse outcome of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    /// Every repo passed to this call succeeded.
    Success,
    /// No repo passed to this call succeeded.
    Failure,
    /// A mix of successes and failures within this call.
    Partial,
}

/// Health of an adapter and, transitively, the engine it fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Operational but with reduced capacity or elevated error rates.
    Degraded,
    /// Not usable.
    Unhealthy,
}

/// Health probe result returned by [`EngineAdapter::health`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Coarse health classification.
    pub status: HealthState,
    /// Free-form diagnostic detail.
    pub details: String,
}

/// Uniform result shape returned by every adapter, regardless of the engine
/// behind it (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResult {
    /// Coarse outcome for this call.
    pub status: AdapterStatus,
    /// Repos this call considers processed (attempted).
    pub repos_processed: Vec<RepoPath>,
    /// Repos this call considers failed, with messages.
    pub repos_failed: Vec<(RepoPath, String)>,
    /// Wall-clock time the adapter spent on this call.
    pub execution_time_seconds: f64,
    /// Free-form metadata common to all adapters.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Populated when `status != Success`.
    pub errors: Option<Vec<String>>,
    /// Engine-specific payload; opaque to everything but the adapter's own
    /// caller-side tooling.
    pub engine_specific: Option<serde_json::Value>,
}

/// Uniform async execution interface over one execution engine (§4.4, §9).
///
/// Implementors are the only code in the system permitted to speak to an
/// external engine. Decorators (`ResilientAdapter`, pool-routing wrappers)
/// wrap one `EngineAdapter` into another that satisfies the same contract.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable name this adapter is registered under.
    fn name(&self) -> &str;

    /// Run `task` against `repos`. May suspend on I/O; no suspension point
    /// may hold a lock across it (§5).
    async fn execute(&self, task: &Task, repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError>;

    /// Cheap, synchronous pre-flight check; failing this raises `Validation`
    /// rather than attempting `execute`.
    fn validate(&self, task: &Task, repos: &[RepoPath]) -> bool;

    /// Report this adapter's (and transitively its engine's) health.
    async fn health(&self) -> HealthStatus;

    /// Optional hook run before `execute`. Default is a no-op.
    async fn pre_execute(&self, _task: &Task, _repos: &[RepoPath]) -> Result<(), MahavishnuError> {
        Ok(())
    }

    /// Optional hook run after `execute` succeeds. Default is a no-op.
    async fn post_execute(&self, _result: &AdapterResult) -> Result<(), MahavishnuError> {
        Ok(())
    }
}
