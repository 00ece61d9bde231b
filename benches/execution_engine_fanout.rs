//! Fan-out throughput of the Execution Engine over an in-memory mock
//! adapter: how wall-clock scales with repo count at a fixed concurrency
//! cap (§4.6, §5 "Bounded concurrency").

use std::path::PathBuf;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use mahavishnu::adapters::mock_engine::MockEngineAdapter;
use mahavishnu::adapters::sqlite::{
    all_embedded_migrations, create_test_pool, Migrator, SqliteDlqRepository, SqliteWorkflowRepository,
};
use mahavishnu::domain::models::{CircuitBreakerConfig, Task};
use mahavishnu::services::{
    CircuitBreakerRegistry, DeadLetterQueue, EventBus, ExecutionEngine, ExecutionEngineConfig,
    ResilientAdapter, RetryConfig,
};

async fn migrated_pool() -> sqlx::SqlitePool {
    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
    pool
}

fn make_repo_dirs(root: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let repo = root.join(format!("repo-{i}"));
            std::fs::create_dir_all(repo.join(".git")).unwrap();
            repo
        })
        .collect()
}

fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let temp = TempDir::new().unwrap();
    let allowed_root = temp.path().to_path_buf();

    let mut group = c.benchmark_group("execution_engine_fanout");

    for repo_count in [1usize, 8, 32, 128] {
        let repos = make_repo_dirs(&allowed_root, repo_count);

        group.bench_with_input(BenchmarkId::from_parameter(repo_count), &repos, |b, repos| {
            b.to_async(&rt).iter(|| async {
                let pool = migrated_pool().await;
                let workflow_repo = Arc::new(SqliteWorkflowRepository::new(pool));
                let events = EventBus::new(128);
                let engine = ExecutionEngine::new(
                    workflow_repo,
                    events,
                    allowed_root.clone(),
                    ExecutionEngineConfig::default(),
                );

                let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(128)));
                let dlq = Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(migrated_pool().await)), EventBus::new(128)));
                let adapter = Arc::new(ResilientAdapter::new(
                    Arc::new(MockEngineAdapter::new("bench-engine")),
                    breakers,
                    RetryConfig::default(),
                    dlq,
                ));
                engine.register_adapter("bench-engine", adapter).await;

                let task = Task::new("bench-task", "sweep", std::collections::HashMap::new()).unwrap();
                engine
                    .execute_workflow(task, repos.clone(), "bench-engine", Some(16))
                    .await
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout);
criterion_main!(benches);
