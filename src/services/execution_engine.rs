//! Execution Engine: per-repo fanout, bounded concurrency, and
//! partial-failure aggregation (§4.6, §5, §8 property 1).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{FailedRepo, RepoPath, Task, Workflow, WorkflowStatus};
use crate::domain::ports::{WorkflowFilter, WorkflowRepository};
use crate::services::dead_letter_queue::WorkflowReplayer;
use crate::services::event_bus::{kind, EventBus};
use crate::services::resilient_adapter::ResilientAdapter;
use crate::services::validators::validate_repo_path;

/// Cooperative cancellation signal shared between [`ExecutionEngine`] and
/// the per-repo tasks it spawns (§5 "Cancellation and timeouts").
#[derive(Clone)]
struct CancelSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Tunables governing fanout, independent of any one workflow submission.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEngineConfig {
    /// Default per-workflow concurrency cap when the caller supplies none.
    pub default_max_concurrency: usize,
    /// How long an in-flight per-repo call is allowed to run after
    /// cancellation before its worker is considered lost (§5).
    pub cancellation_grace_period: Duration,
}

impl Default for ExecutionEngineConfig {
    fn default() -> Self {
        Self { default_max_concurrency: 8, cancellation_grace_period: Duration::from_secs(10) }
    }
}

/// Outcome of one per-repo dispatch, used only to build the aggregate.
enum RepoOutcome {
    Success(RepoPath),
    Failure(FailedRepo),
}

/// Runs workflows across repos through registered engine adapters (§4.6).
pub struct ExecutionEngine {
    workflow_repository: Arc<dyn WorkflowRepository>,
    adapters: RwLock<HashMap<String, Arc<ResilientAdapter>>>,
    events: EventBus,
    allowed_root: PathBuf,
    config: ExecutionEngineConfig,
    cancellations: RwLock<HashMap<Uuid, CancelSignal>>,
}

impl ExecutionEngine {
    /// Build an engine rooted at `allowed_root` (the only directory tree
    /// repo paths may resolve under, §8 property 8).
    #[must_use]
    pub fn new(
        workflow_repository: Arc<dyn WorkflowRepository>,
        events: EventBus,
        allowed_root: PathBuf,
        config: ExecutionEngineConfig,
    ) -> Self {
        Self {
            workflow_repository,
            adapters: RwLock::new(HashMap::new()),
            events,
            allowed_root,
            config,
            cancellations: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the resilient adapter backing `engine_name`.
    pub async fn register_adapter(&self, engine_name: impl Into<String>, adapter: Arc<ResilientAdapter>) {
        self.adapters.write().await.insert(engine_name.into(), adapter);
    }

    async fn resolve_adapter(&self, engine_name: &str) -> Result<Arc<ResilientAdapter>, MahavishnuError> {
        self.adapters
            .read()
            .await
            .get(engine_name)
            .cloned()
            .ok_or_else(|| MahavishnuError::Validation(format!("no adapter registered for engine '{engine_name}'")))
    }

    /// Submit `task` against `repo_paths` through `engine_name` and run to
    /// completion (§4.6 steps 1-6).
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::Validation`] if any repo path fails
    /// validation or `engine_name` has no registered adapter; nothing else
    /// is surfaced here, since per-repo failures are contained in the
    /// returned [`Workflow`].
    pub async fn execute_workflow(
        &self,
        task: Task,
        repo_paths: Vec<PathBuf>,
        engine_name: impl Into<String>,
        max_concurrency: Option<usize>,
    ) -> Result<Workflow, MahavishnuError> {
        let engine_name = engine_name.into();
        let adapter = self.resolve_adapter(&engine_name).await?;

        let mut repos = Vec::with_capacity(repo_paths.len());
        for path in &repo_paths {
            repos.push(validate_repo_path(path, &self.allowed_root)?);
        }
        if repos.is_empty() {
            return Err(MahavishnuError::Validation("a workflow must target at least one repo".into()));
        }

        let mut workflow = Workflow::new(task.clone(), repos.clone(), engine_name.clone());
        self.workflow_repository.create(&workflow).await?;
        self.events.publish(crate::domain::models::Event::for_id(
            kind::WORKFLOW_CREATED,
            workflow.workflow_id,
            serde_json::json!({ "engine": engine_name, "repo_count": repos.len() }),
        ));

        let cancel = CancelSignal::new();
        self.cancellations.write().await.insert(workflow.workflow_id, cancel.clone());

        workflow.mark_started();
        self.workflow_repository.update(&workflow).await?;
        self.events.publish(crate::domain::models::Event::for_id(
            kind::WORKFLOW_STARTED,
            workflow.workflow_id,
            serde_json::json!({}),
        ));

        let semaphore = Arc::new(Semaphore::new(max_concurrency.unwrap_or(self.config.default_max_concurrency).max(1)));
        let mut tasks = JoinSet::new();

        for repo in repos.clone() {
            let adapter = adapter.clone();
            let semaphore = semaphore.clone();
            let task = task.clone();
            let workflow_id = workflow.workflow_id;
            let events = self.events.clone();
            let cancel = cancel.clone();
            let grace = self.config.cancellation_grace_period;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                run_one_repo(adapter, workflow_id, task, repo, cancel, grace, events).await
            });
        }

        let mut successful_repos = Vec::new();
        let mut failed_repos = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(RepoOutcome::Success(repo)) => successful_repos.push(repo),
                Ok(RepoOutcome::Failure(failed)) => failed_repos.push(failed),
                Err(join_err) => {
                    warn!(workflow_id = %workflow.workflow_id, error = %join_err, "execution engine: per-repo task panicked");
                }
            }
        }

        self.cancellations.write().await.remove(&workflow.workflow_id);

        if cancel.is_cancelled() {
            workflow.cancel();
            self.events.publish(crate::domain::models::Event::for_id(
                kind::WORKFLOW_CANCELLED,
                workflow.workflow_id,
                serde_json::json!({}),
            ));
        } else {
            workflow.finalize(successful_repos, failed_repos);
            let event_kind = match workflow.status {
                WorkflowStatus::Success => kind::WORKFLOW_SUCCEEDED,
                WorkflowStatus::Partial => kind::WORKFLOW_PARTIAL,
                WorkflowStatus::Failure => kind::WORKFLOW_FAILED,
                _ => kind::WORKFLOW_FAILED,
            };
            self.events.publish(crate::domain::models::Event::for_id(
                event_kind,
                workflow.workflow_id,
                serde_json::json!({
                    "successful": workflow.successful_repos.len(),
                    "failed": workflow.failed_repos.len(),
                }),
            ));
        }

        self.workflow_repository.update(&workflow).await?;
        info!(workflow_id = %workflow.workflow_id, status = workflow.status.as_str(), "execution engine: workflow finalized");
        Ok(workflow)
    }

    /// Signal cooperative cancellation for an in-flight workflow (§4.6
    /// "Cancellation", §5). Returns `false` if no such workflow is running.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> bool {
        if let Some(signal) = self.cancellations.read().await.get(&workflow_id) {
            signal.cancel();
            true
        } else {
            false
        }
    }

    /// Fetch one workflow by id.
    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>, MahavishnuError> {
        Ok(self.workflow_repository.get(workflow_id).await?)
    }

    /// List workflows, optionally filtered.
    pub async fn list_workflows(&self, filter: Option<WorkflowFilter>) -> Result<Vec<Workflow>, MahavishnuError> {
        Ok(self.workflow_repository.list(filter).await?)
    }
}

async fn run_one_repo(
    adapter: Arc<ResilientAdapter>,
    workflow_id: Uuid,
    task: Task,
    repo: RepoPath,
    cancel: CancelSignal,
    grace: Duration,
    events: EventBus,
) -> RepoOutcome {
    let call = adapter.execute(workflow_id, &task, std::slice::from_ref(&repo));
    tokio::pin!(call);

    let result = tokio::select! {
        biased;
        result = &mut call => result,
        () = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(workflow_id = %workflow_id, repo = %repo, "execution engine: abandoning per-repo call past cancellation grace period");
                    Err(MahavishnuError::WorkerLost(format!("workflow {workflow_id} cancelled; repo {repo} abandoned")))
                }
            }
        }
    };

    match result {
        Ok(adapter_result) if adapter_result.repos_failed.is_empty() => {
            events.publish(crate::domain::models::Event::for_id(
                kind::REPO_SUCCEEDED,
                workflow_id,
                serde_json::json!({ "repo": repo.to_string() }),
            ));
            RepoOutcome::Success(repo)
        }
        Ok(adapter_result) => {
            let message = adapter_result
                .repos_failed
                .into_iter()
                .find(|(failed_repo, _)| failed_repo == &repo)
                .map(|(_, message)| message)
                .unwrap_or_else(|| "adapter reported this repo as failed".to_string());
            events.publish(crate::domain::models::Event::for_id(
                kind::REPO_FAILED,
                workflow_id,
                serde_json::json!({ "repo": repo.to_string(), "error_kind": "Internal" }),
            ));
            RepoOutcome::Failure(FailedRepo { repo, error_kind: "Internal".to_string(), message })
        }
        Err(err) => {
            events.publish(crate::domain::models::Event::for_id(
                kind::REPO_FAILED,
                workflow_id,
                serde_json::json!({ "repo": repo.to_string(), "error_kind": err.kind_tag() }),
            ));
            RepoOutcome::Failure(FailedRepo { repo, error_kind: err.kind_tag().to_string(), message: err.to_string() })
        }
    }
}

/// Adapts [`ExecutionEngine`] to the [`WorkflowReplayer`] contract the DLQ
/// needs for `replay` (§4.3).
pub struct EngineReplayer {
    engine: Arc<ExecutionEngine>,
}

impl EngineReplayer {
    /// Wrap `engine` so the DLQ can re-drive entries through it.
    #[must_use]
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl WorkflowReplayer for EngineReplayer {
    async fn replay(&self, task: Task, repos: Vec<RepoPath>, engine: String) -> Result<(), MahavishnuError> {
        let paths = repos.into_iter().map(|r| r.as_path().to_path_buf()).collect();
        self.engine.execute_workflow(task, paths, engine, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_engine::MockEngineAdapter;
    use crate::adapters::sqlite::{
        all_embedded_migrations, connection::create_test_pool, Migrator, SqliteDlqRepository, SqliteWorkflowRepository,
    };
    use crate::domain::models::CircuitBreakerConfig;
    use crate::services::circuit_breaker::CircuitBreakerRegistry;
    use crate::services::dead_letter_queue::DeadLetterQueue;
    use crate::services::retry_executor::RetryConfig;
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    async fn make_engine(root: &std::path::Path) -> (ExecutionEngine, Arc<DeadLetterQueue>) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        let workflow_repo = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
        let dlq = Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(pool)), EventBus::new(32)));

        let engine = ExecutionEngine::new(workflow_repo, EventBus::new(64), root.to_path_buf(), ExecutionEngineConfig::default());

        let resilient = Arc::new(ResilientAdapter::new(
            Arc::new(MockEngineAdapter::new("mock")),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32))),
            RetryConfig { max_attempts: 1, ..RetryConfig::default() },
            dlq.clone(),
        ));
        engine.register_adapter("mock", resilient).await;
        (engine, dlq)
    }

    fn make_repo(root: &std::path::Path, name: &str) -> PathBuf {
        let repo = root.join(name);
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        repo
    }

    #[tokio::test]
    async fn all_repos_succeed_yields_success_status() {
        let root = tempdir().unwrap();
        let (engine, _dlq) = make_engine(root.path()).await;
        let repos = vec![make_repo(root.path(), "a"), make_repo(root.path(), "b")];
        let task = Task::new("t1", "sweep", StdHashMap::new()).unwrap();

        let workflow = engine.execute_workflow(task, repos, "mock", None).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Success);
        assert_eq!(workflow.successful_repos.len(), 2);
        assert!(workflow.failed_repos.is_empty());
    }

    #[tokio::test]
    async fn one_failing_repo_yields_partial_and_a_dlq_entry() {
        use crate::adapters::mock_engine::FAIL_MARKER;

        let root = tempdir().unwrap();
        let (engine, dlq) = make_engine(root.path()).await;
        let good = make_repo(root.path(), "a");
        let bad = make_repo(root.path(), FAIL_MARKER);
        let task = Task::new("t1", "sweep", StdHashMap::new()).unwrap();

        let workflow = engine.execute_workflow(task, vec![good, bad], "mock", None).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Partial);
        assert_eq!(workflow.successful_repos.len() + workflow.failed_repos.len(), workflow.repos.len());
        assert_eq!(dlq.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unregistered_engine_fails_validation_without_recording_a_workflow() {
        let root = tempdir().unwrap();
        let (engine, _dlq) = make_engine(root.path()).await;
        let task = Task::new("t1", "sweep", StdHashMap::new()).unwrap();
        let err = engine.execute_workflow(task, vec![make_repo(root.path(), "a")], "nope", None).await.unwrap_err();
        assert!(matches!(err, MahavishnuError::Validation(_)));
    }

    #[tokio::test]
    async fn repo_path_outside_allowed_root_fails_validation() {
        let root = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let (engine, _dlq) = make_engine(root.path()).await;
        let task = Task::new("t1", "sweep", StdHashMap::new()).unwrap();
        let err = engine
            .execute_workflow(task, vec![make_repo(outside.path(), "a")], "mock", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MahavishnuError::Validation(_)));
    }

    #[tokio::test]
    async fn get_and_list_workflows_reflect_execution() {
        let root = tempdir().unwrap();
        let (engine, _dlq) = make_engine(root.path()).await;
        let task = Task::new("t1", "sweep", StdHashMap::new()).unwrap();
        let workflow = engine.execute_workflow(task, vec![make_repo(root.path(), "a")], "mock", None).await.unwrap();

        let fetched = engine.get_workflow(workflow.workflow_id).await.unwrap().unwrap();
        assert_eq!(fetched.workflow_id, workflow.workflow_id);

        let listed = engine.list_workflows(None).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn cancel_workflow_returns_false_for_unknown_id() {
        let root = tempdir().unwrap();
        let (engine, _dlq) = make_engine(root.path()).await;
        assert!(!engine.cancel_workflow(Uuid::new_v4()).await);
    }
}
