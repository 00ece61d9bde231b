//! Dead-letter queue entry domain model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::repo::RepoPath;
use super::task::Task;

/// A durable record of a per-repo attempt that exhausted retries or hit an
/// open circuit (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Workflow the failing attempt belonged to.
    pub workflow_id: Uuid,
    /// The task that was being executed.
    pub task: Task,
    /// Repos the attempt covered (normally exactly one).
    pub repos: Vec<RepoPath>,
    /// Engine adapter in use at the time of failure.
    pub engine: String,
    /// Human-readable failure message.
    pub error: String,
    /// Stable error kind tag, see [`crate::domain::error::MahavishnuError::kind_tag`].
    pub error_kind: String,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Free-form diagnostic metadata.
    pub metadata: HashMap<String, Value>,
}

impl DlqEntry {
    /// Build a new entry stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(
        workflow_id: Uuid,
        task: Task,
        repos: Vec<RepoPath>,
        engine: impl Into<String>,
        error: impl Into<String>,
        error_kind: impl Into<String>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            task,
            repos,
            engine: engine.into(),
            error: error.into(),
            error_kind: error_kind.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Optional filter for [`crate::domain::ports::DlqRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    /// Restrict to entries for this workflow.
    pub workflow_id: Option<Uuid>,
    /// Restrict to entries with this error kind tag.
    pub error_kind: Option<String>,
}
