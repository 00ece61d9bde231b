//! End-to-end Execution Engine scenarios against a real sqlite-backed
//! workflow/DLQ store: partial failure, DLQ enqueue, and breaker trip.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use mahavishnu::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteDlqRepository, SqliteWorkflowRepository};
use mahavishnu::domain::error::MahavishnuError;
use mahavishnu::domain::models::{CircuitBreakerConfig, RepoPath, Task, WorkflowStatus};
use mahavishnu::domain::ports::{AdapterResult, AdapterStatus, EngineAdapter, HealthState, HealthStatus};
use mahavishnu::services::{target_key, CircuitBreakerRegistry, DeadLetterQueue, EventBus, ExecutionEngine, ExecutionEngineConfig, ResilientAdapter, RetryConfig};

/// Repos whose path contains this marker are denied with a non-retryable
/// permission error; every other repo succeeds.
const DENY_MARKER: &str = "__deny__";

struct DeniedAdapter {
    calls: AtomicU32,
}

impl DeniedAdapter {
    fn new() -> Self {
        Self { calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl EngineAdapter for DeniedAdapter {
    fn name(&self) -> &str {
        "denied"
    }

    async fn execute(&self, _task: &Task, repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if repos.iter().any(|r| r.as_path().to_string_lossy().contains(DENY_MARKER)) {
            return Err(MahavishnuError::Permission("repo access denied".into()));
        }
        Ok(AdapterResult {
            status: AdapterStatus::Success,
            repos_processed: repos.to_vec(),
            repos_failed: Vec::new(),
            execution_time_seconds: 0.0,
            metadata: HashMap::new(),
            errors: None,
            engine_specific: None,
        })
    }

    fn validate(&self, _task: &Task, _repos: &[RepoPath]) -> bool {
        true
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus { status: HealthState::Healthy, details: "ok".to_string() }
    }
}

fn make_repo(root: &std::path::Path, name: &str) -> PathBuf {
    let repo = root.join(name);
    std::fs::create_dir_all(repo.join(".git")).unwrap();
    repo
}

fn task() -> Task {
    Task::new("t1", "sweep", HashMap::new()).unwrap()
}

struct Fixture {
    engine: ExecutionEngine,
    breakers: Arc<CircuitBreakerRegistry>,
    dlq: Arc<DeadLetterQueue>,
    adapter: Arc<DeniedAdapter>,
}

async fn fixture(root: &std::path::Path, breaker_config: CircuitBreakerConfig) -> Fixture {
    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();

    let workflow_repo = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(pool)), EventBus::new(32)));
    let events = EventBus::new(64);
    let engine = ExecutionEngine::new(workflow_repo, events, root.to_path_buf(), ExecutionEngineConfig::default());

    let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_config, EventBus::new(32)));
    let adapter = Arc::new(DeniedAdapter::new());
    let resilient = Arc::new(ResilientAdapter::new(
        adapter.clone(),
        breakers.clone(),
        RetryConfig { max_attempts: 1, ..RetryConfig::default() },
        dlq.clone(),
    ));
    engine.register_adapter("denied", resilient).await;

    Fixture { engine, breakers, dlq, adapter }
}

// S2: one repo fails with a non-retryable error, the other succeeds; the
// workflow is partial, exactly one DLQ entry is recorded, and the breaker's
// failure count for the failing repo's target advances by one.
#[tokio::test]
async fn non_retryable_failure_yields_partial_workflow_and_one_dlq_entry() {
    let root = tempdir().unwrap();
    let fx = fixture(root.path(), CircuitBreakerConfig { failure_threshold: 5, timeout_seconds: 60, success_threshold: 2 }).await;

    let good = make_repo(root.path(), "a");
    let bad = make_repo(root.path(), DENY_MARKER);

    let workflow = fx.engine.execute_workflow(task(), vec![good, bad.clone()], "denied", None).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Partial);
    assert_eq!(workflow.successful_repos.len(), 1);
    assert_eq!(workflow.failed_repos.len(), 1);
    assert_eq!(fx.dlq.size().await.unwrap(), 1);

    let bad_path = RepoPath::new_unchecked(std::fs::canonicalize(&bad).unwrap());
    let target = target_key("denied", &bad_path.to_string());
    let circuit = fx.breakers.get(&target).await;
    assert_eq!(circuit.consecutive_failures, 1);
}

// S3: the breaker opens after `failure_threshold` consecutive failures for a
// target and refuses further calls to the underlying adapter until the
// configured timeout elapses.
#[tokio::test]
async fn breaker_opens_after_threshold_and_refuses_until_timeout() {
    let root = tempdir().unwrap();
    let fx = fixture(root.path(), CircuitBreakerConfig { failure_threshold: 2, timeout_seconds: 3600, success_threshold: 1 }).await;
    let repo = make_repo(root.path(), "a");

    // Two workflows against the same repo trip the breaker at threshold 2.
    for _ in 0..2 {
        let workflow = fx.engine.execute_workflow(task(), vec![repo.clone()], "denied", None).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failure);
    }

    let calls_before_open = fx.adapter.calls.load(Ordering::SeqCst);
    assert_eq!(calls_before_open, 2);

    // A third call should be refused by the breaker before reaching the
    // adapter at all: the workflow still finalizes (the engine contains the
    // per-repo CircuitOpen as just another failed repo), but the adapter's
    // call counter must not advance.
    let workflow = fx.engine.execute_workflow(task(), vec![repo], "denied", None).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Failure);
    assert_eq!(fx.adapter.calls.load(Ordering::SeqCst), calls_before_open, "breaker must refuse before the adapter is invoked");
    assert_eq!(workflow.failed_repos[0].error_kind, "CircuitOpen");
}

// Events published to the bus reflect a full partial-failure run, useful to
// any observer wired up around the core per the ambient event bus (§6).
#[tokio::test]
async fn partial_failure_publishes_workflow_and_repo_events() {
    let root = tempdir().unwrap();
    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
    let workflow_repo = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(pool)), EventBus::new(32)));
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let engine = ExecutionEngine::new(workflow_repo, events, root.path().to_path_buf(), ExecutionEngineConfig::default());

    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32)));
    let resilient = Arc::new(ResilientAdapter::new(
        Arc::new(mahavishnu::adapters::mock_engine::MockEngineAdapter::new("mock")),
        breakers,
        RetryConfig { max_attempts: 1, ..RetryConfig::default() },
        dlq,
    ));
    engine.register_adapter("mock", resilient).await;

    let good = make_repo(root.path(), "a");
    let bad = make_repo(root.path(), mahavishnu::adapters::mock_engine::FAIL_MARKER);
    let workflow = engine.execute_workflow(task(), vec![good, bad], "mock", None).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Partial);

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&"workflow.created".to_string()));
    assert!(kinds.contains(&"workflow.partial".to_string()));
    assert!(kinds.contains(&"repo.succeeded".to_string()));
    assert!(kinds.contains(&"repo.failed".to_string()));
}

/// An adapter that sleeps well past any reasonable cancellation window
/// before succeeding, so a test can reliably cancel it mid-flight.
struct SlowAdapter;

#[async_trait]
impl EngineAdapter for SlowAdapter {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _task: &Task, repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError> {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        Ok(AdapterResult {
            status: AdapterStatus::Success,
            repos_processed: repos.to_vec(),
            repos_failed: Vec::new(),
            execution_time_seconds: 0.3,
            metadata: HashMap::new(),
            errors: None,
            engine_specific: None,
        })
    }

    fn validate(&self, _task: &Task, _repos: &[RepoPath]) -> bool {
        true
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus { status: HealthState::Healthy, details: "ok".to_string() }
    }
}

#[tokio::test]
async fn cancel_stops_a_running_workflow() {
    let root = tempdir().unwrap();
    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
    let workflow_repo = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(pool)), EventBus::new(32)));
    let events = EventBus::new(64);
    let engine = Arc::new(ExecutionEngine::new(workflow_repo, events, root.path().to_path_buf(), ExecutionEngineConfig::default()));

    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32)));
    let resilient = Arc::new(ResilientAdapter::new(Arc::new(SlowAdapter), breakers, RetryConfig { max_attempts: 1, ..RetryConfig::default() }, dlq));
    engine.register_adapter("slow", resilient).await;

    let repo = make_repo(root.path(), "a");
    let engine_for_driver = engine.clone();
    let driver = tokio::spawn(async move { engine_for_driver.execute_workflow(task(), vec![repo], "slow", None).await });

    // The workflow row is persisted before per-repo dispatch begins, well
    // before the adapter's 300ms sleep resolves.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let workflows = engine.list_workflows(None).await.unwrap();
    assert_eq!(workflows.len(), 1, "workflow should already be recorded");
    let cancelled = engine.cancel_workflow(workflows[0].workflow_id).await;
    assert!(cancelled, "cancel_workflow should find the in-flight workflow");

    let workflow = driver.await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);
}
