//! Core error taxonomy for the Mahavishnu orchestrator.
//!
//! Every fallible operation in the core resolves to one of the kinds in
//! [`MahavishnuError`]. Infrastructure-layer errors (sqlite, process spawning)
//! are defined as their own narrow `thiserror` enums and convert into this one
//! via `#[from]`, so a caller only ever has to classify one type.

use thiserror::Error;
use uuid::Uuid;

/// The exhaustive error taxonomy for the core (§7 of the design).
///
/// Each variant corresponds to one of the error kinds the orchestrator
/// distinguishes: whether a failure is retried by the Retry Executor,
/// contained as a per-repo/per-step result, or propagated to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MahavishnuError {
    /// Inputs did not satisfy contracts. Never retried; surfaced to the caller.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Access denied by policy.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A deadline was exceeded.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A remote/operational failure expected to clear on its own.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A circuit breaker refused the call for `target`.
    #[error("circuit open for {target}, retry after {retry_after_secs}s")]
    CircuitOpen {
        /// The breaker's target key, e.g. `"<engine>:<repo>"`.
        target: String,
        /// Seconds remaining before a half-open probe is admitted.
        retry_after_secs: u64,
    },

    /// The worker executing a task died or was force-killed mid-task.
    #[error("worker lost: {0}")]
    WorkerLost(String),

    /// The target pool is not accepting work.
    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    /// A saga step exhausted its retries.
    #[error("saga step '{step}' failed: {reason}")]
    SagaStepFailed {
        /// Name of the step that failed.
        step: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An invariant was violated. Indicates a bug; never retried.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl MahavishnuError {
    /// Whether the generic Retry Executor should attempt this operation
    /// again. `WorkerLost` is deliberately excluded: §7 retries it at most
    /// once and only when the task is known-idempotent, a narrower rule than
    /// the executor's blanket `max_attempts`, so the Worker Pool Manager
    /// handles that retry itself rather than going through here.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    /// Whether this failure is a permanent, non-retryable business failure.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Permission(_) | Self::Internal(_)
        )
    }

    /// Short, stable tag used as the `error_kind` column in persisted records
    /// (DLQ entries, `failed_repos`) so storage never depends on `Display`
    /// wording.
    #[must_use]
    pub const fn kind_tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::NotFound(_) => "NotFound",
            Self::Permission(_) => "Permission",
            Self::Timeout(_) => "Timeout",
            Self::Transient(_) => "Transient",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::WorkerLost(_) => "WorkerLost",
            Self::PoolUnavailable(_) => "PoolUnavailable",
            Self::SagaStepFailed { .. } => "SagaStepFailed",
            Self::Internal(_) => "Internal",
        }
    }
}

/// Errors from the durable stores backing workflows, DLQ entries, and sagas.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying database connection or query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value did not round-trip through its domain representation.
    #[error("failed to deserialize stored record: {0}")]
    Corrupt(String),

    /// A migration failed to apply.
    #[error("migration {version} failed: {source}")]
    Migration {
        /// Migration version that failed.
        version: i64,
        /// Underlying sqlx error.
        #[source]
        source: sqlx::Error,
    },

    /// The requested entity was not found.
    #[error("not found: {0}")]
    NotFound(Uuid),
}

impl StoreError {
    /// Whether a caller retrying the same store operation might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<StoreError> for MahavishnuError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Errors raised while spawning or supervising worker processes.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Spawning the child process failed outright.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The worker did not complete its ready handshake within `spawn_timeout`.
    #[error("worker handshake timed out")]
    HandshakeTimeout,

    /// Sending a signal to the worker process failed.
    #[error("failed to signal worker {pid}: {source}")]
    SignalFailed {
        /// OS process id of the worker.
        pid: u32,
        /// Underlying errno-derived failure.
        #[source]
        source: nix::Error,
    },
}

impl From<ProcessError> for MahavishnuError {
    fn from(err: ProcessError) -> Self {
        Self::WorkerLost(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_transient_are_transient() {
        assert!(MahavishnuError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(MahavishnuError::Transient("boom".into()).is_transient());
    }

    #[test]
    fn validation_not_found_permission_internal_are_permanent() {
        assert!(MahavishnuError::Validation("bad".into()).is_permanent());
        assert!(MahavishnuError::NotFound("x".into()).is_permanent());
        assert!(MahavishnuError::Permission("no".into()).is_permanent());
        assert!(MahavishnuError::Internal("bug".into()).is_permanent());
    }

    #[test]
    fn circuit_open_pool_unavailable_and_worker_lost_are_neither() {
        let circuit_open = MahavishnuError::CircuitOpen {
            target: "engine:/r/a".into(),
            retry_after_secs: 10,
        };
        assert!(!circuit_open.is_transient());
        assert!(!circuit_open.is_permanent());

        let pool_unavailable = MahavishnuError::PoolUnavailable("draining".into());
        assert!(!pool_unavailable.is_transient());
        assert!(!pool_unavailable.is_permanent());

        let worker_lost = MahavishnuError::WorkerLost("died".into());
        assert!(!worker_lost.is_transient());
        assert!(!worker_lost.is_permanent());
    }

    #[test]
    fn kind_tag_is_stable_for_persistence() {
        assert_eq!(MahavishnuError::Validation("x".into()).kind_tag(), "Validation");
        assert_eq!(
            MahavishnuError::SagaStepFailed { step: "a".into(), reason: "b".into() }.kind_tag(),
            "SagaStepFailed"
        );
    }

    #[test]
    fn store_not_found_maps_to_domain_not_found() {
        let id = Uuid::new_v4();
        let mapped: MahavishnuError = StoreError::NotFound(id).into();
        assert!(matches!(mapped, MahavishnuError::NotFound(s) if s == id.to_string()));
    }
}
