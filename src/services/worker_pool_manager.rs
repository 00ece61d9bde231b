//! Worker Pool Manager: lifecycle, health supervision, autoscaling, and task
//! routing for externally-spawned worker processes (§4.7).
//!
//! Process management follows the same shape as the system this crate was
//! adapted from uses for its own child processes: `tokio::process::Command`
//! with piped stdio, a timeout-then-kill shutdown sequence, and `nix` for a
//! graceful `SIGTERM` ahead of the forced kill. Spawning and task dispatch
//! are behind [`WorkerProcessLauncher`] so the lifecycle/health/autoscale
//! logic below can be exercised without a real subprocess, the same seam
//! [`crate::domain::ports::EngineAdapter`] gives the Execution Engine.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::{MahavishnuError, ProcessError};
use crate::domain::models::{PoolConfig, PoolStatus, Task, Worker, WorkerPool, WorkerStatus};
use crate::services::event_bus::{kind, EventBus};

/// One line of the worker wire protocol (§4.7 "External Interfaces").
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerMessage {
    Ping,
    Pong,
    Task { task: Task },
    TaskDone { ok: bool, error: Option<String> },
}

async fn write_line(stdin: &mut ChildStdin, message: &WorkerMessage) -> std::io::Result<()> {
    let mut line = serde_json::to_string(message).unwrap_or_default();
    line.push('\n');
    stdin.write_all(line.as_bytes()).await
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> std::io::Result<Option<WorkerMessage>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(serde_json::from_str(line.trim()).ok())
}

/// Spawns, health-probes, signals, and dispatches tasks to worker processes.
/// Implemented once against real OS processes; tests supply an in-memory
/// fake so the manager's state machine can be exercised deterministically.
#[async_trait]
pub trait WorkerProcessLauncher: Send + Sync {
    /// Spawn a new worker process; returns its OS pid.
    async fn spawn(&self) -> Result<u32, ProcessError>;

    /// Probe for liveness/responsiveness. `false` counts as one consecutive
    /// health failure (§4.7).
    async fn probe(&self, pid: u32) -> bool;

    /// Dispatch `task` to the worker at `pid` and await completion.
    async fn dispatch(&self, pid: u32, task: &Task) -> Result<(), MahavishnuError>;

    /// Send `SIGTERM`, wait up to `grace`, then force-kill if still alive.
    async fn terminate(&self, pid: u32, grace: Duration);
}

/// Production launcher: one real child process per worker, communicating
/// over newline-delimited JSON on stdin/stdout.
pub struct ChildProcessLauncher {
    program: String,
    args: Vec<String>,
    children: RwLock<HashMap<u32, ManagedChild>>,
}

struct ManagedChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildProcessLauncher {
    /// Launch `program args...` for every spawned worker.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, children: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl WorkerProcessLauncher for ChildProcessLauncher {
    async fn spawn(&self) -> Result<u32, ProcessError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProcessError::SpawnFailed)?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::SpawnFailed(std::io::Error::other("worker process exited immediately after spawn"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| ProcessError::SpawnFailed(std::io::Error::other("no stdin")))?;
        let stdout = child.stdout.take().ok_or_else(|| ProcessError::SpawnFailed(std::io::Error::other("no stdout")))?;

        self.children.write().await.insert(pid, ManagedChild { child, stdin, stdout: BufReader::new(stdout) });
        Ok(pid)
    }

    async fn probe(&self, pid: u32) -> bool {
        let mut children = self.children.write().await;
        let Some(managed) = children.get_mut(&pid) else { return false };

        if write_line(&mut managed.stdin, &WorkerMessage::Ping).await.is_err() {
            return false;
        }
        matches!(
            tokio::time::timeout(Duration::from_secs(5), read_line(&mut managed.stdout)).await,
            Ok(Ok(Some(WorkerMessage::Pong)))
        )
    }

    async fn dispatch(&self, pid: u32, task: &Task) -> Result<(), MahavishnuError> {
        let mut children = self.children.write().await;
        let managed = children.get_mut(&pid).ok_or_else(|| MahavishnuError::WorkerLost(format!("no worker at pid {pid}")))?;

        write_line(&mut managed.stdin, &WorkerMessage::Task { task: task.clone() })
            .await
            .map_err(|e| MahavishnuError::WorkerLost(e.to_string()))?;

        match tokio::time::timeout(Duration::from_secs(300), read_line(&mut managed.stdout)).await {
            Ok(Ok(Some(WorkerMessage::TaskDone { ok: true, .. }))) => Ok(()),
            Ok(Ok(Some(WorkerMessage::TaskDone { ok: false, error }))) => {
                Err(MahavishnuError::Internal(error.unwrap_or_else(|| "worker reported task failure".to_string())))
            }
            Ok(Ok(_)) | Ok(Err(_)) => Err(MahavishnuError::WorkerLost(format!("worker {pid} connection closed"))),
            Err(_) => Err(MahavishnuError::Timeout(Duration::from_secs(300))),
        }
    }

    async fn terminate(&self, pid: u32, grace: Duration) {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            let err = ProcessError::SignalFailed { pid, source: e };
            warn!(pid, error = %err, "worker pool manager: SIGTERM failed, forcing kill");
        }

        let mut children = self.children.write().await;
        let Some(mut managed) = children.remove(&pid) else { return };
        drop(children);

        match tokio::time::timeout(grace, managed.child.wait()).await {
            Ok(Ok(status)) => info!(pid, ?status, "worker pool manager: worker exited"),
            Ok(Err(e)) => error!(pid, error = %e, "worker pool manager: error waiting for worker exit"),
            Err(_) => {
                warn!(pid, "worker pool manager: graceful shutdown timed out, killing");
                let _ = managed.child.kill().await;
            }
        }
    }
}

/// Tunables plus the launcher make up one managed pool.
pub struct WorkerPoolManager {
    launcher: Arc<dyn WorkerProcessLauncher>,
    events: EventBus,
    pool: RwLock<WorkerPool>,
    workers: RwLock<HashMap<Uuid, Worker>>,
    spawn_limiter: governor::DefaultDirectRateLimiter,
}

impl WorkerPoolManager {
    /// Build a manager for a pool of `pool_type`, not yet started.
    #[must_use]
    pub fn new(pool_type: impl Into<String>, config: PoolConfig, launcher: Arc<dyn WorkerProcessLauncher>, events: EventBus) -> Self {
        let pool = WorkerPool::new(pool_type, config);
        let quota = Quota::per_second(NonZeroU32::new(2).expect("2 is nonzero"));
        Self {
            launcher,
            events,
            pool: RwLock::new(pool),
            workers: RwLock::new(HashMap::new()),
            spawn_limiter: RateLimiter::direct(quota),
        }
    }

    /// Snapshot the pool record.
    pub async fn pool(&self) -> WorkerPool {
        self.pool.read().await.clone()
    }

    /// Snapshot every worker currently tracked.
    pub async fn workers(&self) -> Vec<Worker> {
        self.workers.read().await.values().cloned().collect()
    }

    async fn config(&self) -> PoolConfig {
        self.pool.read().await.config
    }

    async fn pool_id(&self) -> Uuid {
        self.pool.read().await.pool_id
    }

    /// Spawn `min_workers`, waiting up to `spawn_timeout` for them to reach
    /// `ready`, then mark the pool `active` (or `degraded` if not all made
    /// it in time) (§4.7 "Pool lifecycle").
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::PoolUnavailable`] if not a single worker
    /// reaches `ready` within the timeout.
    pub async fn start(&self) -> Result<(), MahavishnuError> {
        let config = self.config().await;
        for _ in 0..config.min_workers {
            self.spawn_worker().await?;
        }

        let deadline = tokio::time::Instant::now() + config.spawn_timeout;
        loop {
            let ready = self.count_by_status(WorkerStatus::Ready).await;
            if ready >= config.min_workers {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let ready = self.count_by_status(WorkerStatus::Ready).await;
        let pool_id = self.pool_id().await;
        if ready == 0 {
            return Err(MahavishnuError::PoolUnavailable(format!("pool {pool_id} failed to start any worker")));
        }

        let mut pool = self.pool.write().await;
        pool.status = if ready >= config.min_workers { PoolStatus::Active } else { PoolStatus::Degraded };
        self.events.publish(crate::domain::models::Event::for_id(kind::POOL_CREATED, pool_id, serde_json::json!({ "ready": ready })));
        Ok(())
    }

    async fn count_by_status(&self, status: WorkerStatus) -> usize {
        self.workers.read().await.values().filter(|w| w.status == status).count()
    }

    async fn spawn_worker(&self) -> Result<Uuid, MahavishnuError> {
        for _ in 0..10 {
            if self.spawn_limiter.check().is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let pool_id = self.pool_id().await;
        let mut worker = Worker::new(pool_id);
        let pid = self.launcher.spawn().await?;
        worker.pid = Some(pid);
        worker.status = WorkerStatus::Ready;
        worker.last_heartbeat = Utc::now();

        let worker_id = worker.worker_id;
        self.workers.write().await.insert(worker_id, worker);
        self.events.publish(crate::domain::models::Event::for_id(kind::WORKER_SPAWNED, worker_id, serde_json::json!({ "pid": pid })));
        self.events.publish(crate::domain::models::Event::for_id(kind::WORKER_READY, worker_id, serde_json::json!({})));
        Ok(worker_id)
    }

    /// Run one health-probe pass over every tracked worker (§4.7 "Health
    /// supervision"). A worker that fails `max_consecutive_health_failures`
    /// probes in a row is marked `unhealthy`, terminated, and replaced.
    pub async fn health_check_once(&self) {
        let config = self.config().await;
        let worker_ids: Vec<Uuid> = self.workers.read().await.keys().copied().collect();

        for worker_id in worker_ids {
            let pid = match self.workers.read().await.get(&worker_id) {
                Some(w) if w.status == WorkerStatus::Ready || w.status == WorkerStatus::Busy => w.pid,
                _ => continue,
            };
            let Some(pid) = pid else { continue };

            let healthy = self.launcher.probe(pid).await;
            let mut workers = self.workers.write().await;
            let Some(worker) = workers.get_mut(&worker_id) else { continue };

            if healthy {
                worker.consecutive_health_failures = 0;
                worker.last_heartbeat = Utc::now();
                continue;
            }

            worker.consecutive_health_failures += 1;
            if worker.consecutive_health_failures < config.max_consecutive_health_failures {
                continue;
            }

            worker.status = WorkerStatus::Unhealthy;
            drop(workers);
            warn!(worker_id = %worker_id, pid, "worker pool manager: worker unhealthy, replacing");
            self.events.publish(crate::domain::models::Event::for_id(kind::WORKER_UNHEALTHY, worker_id, serde_json::json!({})));
            self.retire_worker(worker_id, Duration::from_secs(0)).await;
            if self.pool.read().await.status == PoolStatus::Active {
                let _ = self.spawn_worker().await;
            }
        }

        self.reconcile_pool_status().await;
    }

    async fn retire_worker(&self, worker_id: Uuid, grace: Duration) {
        let pid = { self.workers.write().await.remove(&worker_id).and_then(|w| w.pid) };
        if let Some(pid) = pid {
            self.launcher.terminate(pid, grace).await;
        }
        self.events.publish(crate::domain::models::Event::for_id(kind::WORKER_DEAD, worker_id, serde_json::json!({})));
    }

    async fn reconcile_pool_status(&self) {
        let config = self.config().await;
        let ready = self.count_by_status(WorkerStatus::Ready).await + self.count_by_status(WorkerStatus::Busy).await;
        let mut pool = self.pool.write().await;
        if matches!(pool.status, PoolStatus::Active | PoolStatus::Degraded) {
            let pool_id = pool.pool_id;
            let next = if ready < config.min_workers { PoolStatus::Degraded } else { PoolStatus::Active };
            if next != pool.status {
                pool.status = next;
                if next == PoolStatus::Degraded {
                    drop(pool);
                    self.events.publish(crate::domain::models::Event::for_id(kind::POOL_DEGRADED, pool_id, serde_json::json!({})));
                }
            }
        }
    }

    /// Run one autoscaling decision given an external `load` signal in
    /// `[0.0, 1.0]` — the fraction of ready+busy workers currently busy
    /// (§4.7 "Autoscaling"). Rate-limited by the same spawn limiter `start`
    /// and health recovery use, so a flapping load signal cannot thrash.
    pub async fn autoscale_once(&self, load: f64) {
        let config = self.config().await;
        let status = self.pool.read().await.status;
        if !matches!(status, PoolStatus::Active | PoolStatus::Degraded) {
            return;
        }

        let live = self.count_by_status(WorkerStatus::Ready).await + self.count_by_status(WorkerStatus::Busy).await;

        if load >= config.scale_up_threshold && live < config.max_workers {
            let _ = self.spawn_worker().await;
            self.reconcile_pool_status().await;
            return;
        }

        if load <= config.scale_down_threshold && live > config.min_workers {
            if let Some(idle) = self.workers.read().await.values().find(|w| w.status == WorkerStatus::Ready).map(|w| w.worker_id) {
                self.retire_worker(idle, config.graceful_shutdown_timeout).await;
            }
            self.reconcile_pool_status().await;
        }
    }

    /// Route `task` to an available worker, marking it `busy` for the
    /// duration of the call (§4.7 "Task routing").
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::PoolUnavailable`] if no worker is
    /// currently `ready`.
    pub async fn execute_on_pool(&self, task: &Task) -> Result<Uuid, MahavishnuError> {
        let candidate = {
            let mut workers = self.workers.write().await;
            let worker = workers.values_mut().find(|w| w.is_available());
            match worker {
                Some(w) => {
                    w.status = WorkerStatus::Busy;
                    w.active_task_id = Some(task.id.clone());
                    Some((w.worker_id, w.pid))
                }
                None => None,
            }
        };

        let Some((worker_id, pid)) = candidate else {
            return Err(MahavishnuError::PoolUnavailable("no ready worker available".to_string()));
        };
        let Some(pid) = pid else {
            return Err(MahavishnuError::PoolUnavailable(format!("worker {worker_id} has no pid")));
        };

        let result = self.launcher.dispatch(pid, task).await;

        let mut workers = self.workers.write().await;
        if let Some(w) = workers.get_mut(&worker_id) {
            w.active_task_id = None;
            w.status = if result.is_ok() { WorkerStatus::Ready } else { WorkerStatus::Unhealthy };
        }
        drop(workers);

        result.map(|()| worker_id)
    }

    /// Stop accepting new tasks, wait up to `graceful_shutdown_timeout` for
    /// busy workers to finish, then terminate every worker (§4.7 "Pool
    /// lifecycle", draining → stopped).
    pub async fn drain_and_stop(&self) {
        let config = self.config().await;
        let pool_id = self.pool_id().await;
        self.pool.write().await.status = PoolStatus::Draining;

        let deadline = tokio::time::Instant::now() + config.graceful_shutdown_timeout;
        while self.count_by_status(WorkerStatus::Busy).await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let worker_ids: Vec<Uuid> = self.workers.read().await.keys().copied().collect();
        for worker_id in worker_ids {
            self.retire_worker(worker_id, config.graceful_shutdown_timeout).await;
        }

        self.pool.write().await.status = PoolStatus::Stopped;
        self.events.publish(crate::domain::models::Event::for_id(kind::POOL_DESTROYED, pool_id, serde_json::json!({})));
        info!(pool_id = %pool_id, "worker pool manager: pool stopped");
    }
}
