//! Workflow domain model.
//!
//! A workflow is one invocation of a task across a set of repositories. It is
//! created `pending`, transitions to `running` on first repo start, and
//! becomes immutable once it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo::RepoPath;
use super::task::Task;

/// Lifecycle status of a [`Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Recorded but no repo execution has started.
    Pending,
    /// At least one repo execution has started.
    Running,
    /// Every repo succeeded.
    Success,
    /// A mix of successes and failures.
    Partial,
    /// No repo succeeded.
    Failure,
    /// Cancelled before completion.
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status is terminal (the workflow row becomes immutable).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Failure | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failure" => Some(Self::Failure),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A single repo's outcome within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRepo {
    /// The repository that failed.
    pub repo: RepoPath,
    /// Stable kind tag, see [`crate::domain::error::MahavishnuError::kind_tag`].
    pub error_kind: String,
    /// Human-readable failure message.
    pub message: String,
}

/// The unit of execution: one task run across a set of repos through one engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier.
    pub workflow_id: Uuid,
    /// The task being executed.
    pub task: Task,
    /// Repositories the task runs against.
    pub repos: Vec<RepoPath>,
    /// Name of the engine adapter used.
    pub engine: String,
    /// When the workflow was recorded.
    pub created_at: DateTime<Utc>,
    /// When the first repo execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// Repos that completed successfully.
    pub successful_repos: Vec<RepoPath>,
    /// Repos that failed, with diagnostics.
    pub failed_repos: Vec<FailedRepo>,
    /// Wall-clock execution time once terminal.
    pub execution_time_seconds: Option<f64>,
}

impl Workflow {
    /// Create a freshly-submitted, `pending` workflow row.
    #[must_use]
    pub fn new(task: Task, repos: Vec<RepoPath>, engine: impl Into<String>) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            task,
            repos,
            engine: engine.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: WorkflowStatus::Pending,
            successful_repos: Vec::new(),
            failed_repos: Vec::new(),
            execution_time_seconds: None,
        }
    }

    /// Mark the workflow as started, if it has not already been.
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
            self.status = WorkflowStatus::Running;
        }
    }

    /// Aggregate per-repo outcomes into a terminal status and finalize timing
    /// (§4.6 step 5-6). No-op if the workflow is already terminal.
    pub fn finalize(&mut self, successful_repos: Vec<RepoPath>, failed_repos: Vec<FailedRepo>) {
        if self.status.is_terminal() {
            return;
        }
        let total = self.repos.len();
        let succeeded = successful_repos.len();
        let failed = failed_repos.len();
        self.status = if failed == 0 && succeeded == total {
            WorkflowStatus::Success
        } else if succeeded == 0 {
            WorkflowStatus::Failure
        } else {
            WorkflowStatus::Partial
        };
        self.successful_repos = successful_repos;
        self.failed_repos = failed_repos;
        let completed_at = Utc::now();
        self.execution_time_seconds = self
            .started_at
            .map(|started| (completed_at - started).num_milliseconds() as f64 / 1000.0);
        self.completed_at = Some(completed_at);
    }

    /// Mark the workflow cancelled. No-op if already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = WorkflowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }
}
