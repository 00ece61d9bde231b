//! Worker pool and worker domain models (§3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Spawning `min_workers`.
    Starting,
    /// Health-supervised and autoscaled.
    Active,
    /// Not accepting new tasks; draining in-flight work.
    Draining,
    /// All workers reaped.
    Stopped,
    /// Fewer than `min_workers` ready; still health-supervised.
    Degraded,
}

/// Lifecycle status of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Child process created; handshake pending.
    Spawning,
    /// Handshake complete; eligible for tasks.
    Ready,
    /// Currently executing a task.
    Busy,
    /// Missed consecutive heartbeats or failed an explicit probe.
    Unhealthy,
    /// `SIGTERM` issued; waiting for graceful exit.
    Stopping,
    /// Reaped.
    Dead,
}

/// Per-pool tunables (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Never spawn fewer than this many workers while active.
    pub min_workers: usize,
    /// Never spawn more than this many workers.
    pub max_workers: usize,
    /// Load signal at/above which the autoscaler spawns another worker.
    pub scale_up_threshold: f64,
    /// Load signal at/below which the autoscaler retires an idle worker.
    pub scale_down_threshold: f64,
    /// Interval between health probes.
    pub health_interval: std::time::Duration,
    /// Maximum time to wait for `min_workers` to reach `ready`.
    pub spawn_timeout: std::time::Duration,
    /// Maximum time to wait for in-flight work before force-stopping.
    pub graceful_shutdown_timeout: std::time::Duration,
    /// Consecutive health-probe failures before a worker is `unhealthy`.
    pub max_consecutive_health_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            health_interval: std::time::Duration::from_secs(10),
            spawn_timeout: std::time::Duration::from_secs(30),
            graceful_shutdown_timeout: std::time::Duration::from_secs(10),
            max_consecutive_health_failures: 3,
        }
    }
}

/// A supervised, homogeneous set of worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPool {
    /// Unique pool identifier.
    pub pool_id: Uuid,
    /// Identifies the class of worker this pool runs.
    pub pool_type: String,
    /// Current lifecycle status.
    pub status: PoolStatus,
    /// Tunables governing this pool.
    pub config: PoolConfig,
}

impl WorkerPool {
    /// Create a pool in the `starting` state. Worker membership lives
    /// separately in `WorkerPoolManager` so that the lock scope covers only
    /// what needs to be mutated together.
    #[must_use]
    pub fn new(pool_type: impl Into<String>, config: PoolConfig) -> Self {
        Self { pool_id: Uuid::new_v4(), pool_type: pool_type.into(), status: PoolStatus::Starting, config }
    }
}

/// One external worker process owned by a [`WorkerPool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Unique worker identifier.
    pub worker_id: Uuid,
    /// OS process id, once spawned.
    pub pid: Option<u32>,
    /// Owning pool.
    pub pool_id: Uuid,
    /// Current lifecycle status.
    pub status: WorkerStatus,
    /// Last time a heartbeat or successful probe was observed.
    pub last_heartbeat: DateTime<Utc>,
    /// Consecutive failed health probes.
    pub consecutive_health_failures: u32,
    /// The task this worker is currently executing, if `busy`.
    pub active_task_id: Option<String>,
}

impl Worker {
    /// A freshly-spawning worker with no pid yet assigned.
    #[must_use]
    pub fn new(pool_id: Uuid) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            pid: None,
            pool_id,
            status: WorkerStatus::Spawning,
            last_heartbeat: Utc::now(),
            consecutive_health_failures: 0,
            active_task_id: None,
        }
    }

    /// Whether this worker can currently accept a task.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.status, WorkerStatus::Ready)
    }
}
