//! Saga domain model (§3, §4.8). Step *behavior* (execute/compensate
//! closures) is defined in `services::saga_coordinator`; this module only
//! holds the persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a [`Saga`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Row created, execution not yet started.
    Pending,
    /// Steps are being executed in order.
    InProgress,
    /// All steps completed.
    Completed,
    /// A step failed; completed steps are being compensated in reverse.
    Compensating,
    /// Terminal failure after (best-effort) compensation.
    Failed,
}

impl SagaStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Compensating => "compensating",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "compensating" => Some(Self::Compensating),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether crash recovery should resume a saga sitting in this status.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::InProgress | Self::Compensating)
    }
}

/// The persisted row for one saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    /// Unique saga identifier, also used as the advisory-lock key.
    pub saga_id: Uuid,
    /// Caller-assigned type tag, e.g. `"workflow_creation"`.
    pub saga_type: String,
    /// Current lifecycle status.
    pub status: SagaStatus,
    /// Index of the next step to execute (or, while compensating, the
    /// highest index not yet compensated plus one).
    pub current_step_index: usize,
    /// Indices of steps that have executed successfully, in execution order.
    pub completed_steps: Vec<usize>,
    /// Accumulated state, merged with each step's delta.
    pub state: Value,
    /// Number of retry attempts consumed by the step currently in flight.
    pub retry_count: u32,
    /// Set once the saga reaches `failed`; names the originating failure.
    pub error_message: Option<String>,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Saga {
    /// A freshly-created, `pending` saga over `initial_state`.
    #[must_use]
    pub fn new(saga_id: Uuid, saga_type: impl Into<String>, initial_state: Value) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            saga_type: saga_type.into(),
            status: SagaStatus::Pending,
            current_step_index: 0,
            completed_steps: Vec::new(),
            state: initial_state,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `(saga_id, step_name, idempotency_key)` uniqueness guard for at-most-once
/// observable step execution. `namespace` distinguishes execution records
/// from compensation records, per §4.8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Owning saga.
    pub saga_id: Uuid,
    /// Name of the step this record guards.
    pub step_name: String,
    /// The step's stable idempotency key.
    pub idempotency_key: String,
    /// `"execute"` or `"compensate"`.
    pub namespace: String,
}
