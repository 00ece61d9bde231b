//! A deterministic in-memory engine adapter.
//!
//! Used by the integration tests exercising the Execution Engine and the
//! Resilient Adapter decorator, and as the template new engine adapters
//! (outside this crate) are expected to follow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{RepoPath, Task};
use crate::domain::ports::{AdapterResult, AdapterStatus, EngineAdapter, HealthState, HealthStatus};

/// Repos whose path, as a string, contains this substring fail deterministically.
pub const FAIL_MARKER: &str = "__fail__";

/// A mock adapter that succeeds for every repo except ones whose path contains
/// [`FAIL_MARKER`], and can be told to report itself as unhealthy.
pub struct MockEngineAdapter {
    name: String,
    healthy: Arc<std::sync::atomic::AtomicBool>,
    calls: AtomicU64,
}

impl MockEngineAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            calls: AtomicU64::new(0),
        }
    }

    /// Flip this adapter's reported health, independent of its execute behavior.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of times `execute` has been called so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineAdapter for MockEngineAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &Task, repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut processed = Vec::new();
        let mut failed = Vec::new();

        for repo in repos {
            if repo.as_path().to_string_lossy().contains(FAIL_MARKER) {
                failed.push((repo.clone(), format!("mock adapter: repo path marked for failure ({task_id})", task_id = task.id)));
            } else {
                processed.push(repo.clone());
            }
        }

        let status = if failed.is_empty() {
            AdapterStatus::Success
        } else if processed.is_empty() {
            AdapterStatus::Failure
        } else {
            AdapterStatus::Partial
        };

        let mut metadata = HashMap::new();
        metadata.insert("task_type".to_string(), Value::String(task.task_type.clone()));

        Ok(AdapterResult {
            status,
            repos_processed: processed,
            repos_failed: failed,
            execution_time_seconds: 0.0,
            metadata,
            errors: None,
            engine_specific: None,
        })
    }

    fn validate(&self, task: &Task, repos: &[RepoPath]) -> bool {
        !task.id.is_empty() && !repos.is_empty()
    }

    async fn health(&self) -> HealthStatus {
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus { status: HealthState::Healthy, details: "ok".to_string() }
        } else {
            HealthStatus { status: HealthState::Unhealthy, details: "forced unhealthy".to_string() }
        }
    }
}
