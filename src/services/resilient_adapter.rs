//! Resilient Adapter: the retry + circuit-breaker + DLQ decorator (§4.5).
//!
//! Wraps any [`EngineAdapter`] with the call sequence from §4.5: breaker
//! check, retry-wrapped invocation, breaker notification, DLQ enqueue on
//! terminal failure. The Execution Engine always calls this decorator with
//! exactly one repo per call (its fan-out is per-repo, §4.6 step 4), so the
//! breaker's target key is derived from that single repo; a multi-repo call
//! falls back to a composite key over the joined paths, which is correct
//! but coarser than the per-repo granularity §4.1 assumes.
//!
//! This type deliberately does *not* implement [`EngineAdapter`] itself: DLQ
//! entries must reference the owning `workflow_id`, which the trait's
//! `execute` signature has no room for. Exposing `execute` directly (rather
//! than shoehorning workflow id through the trait) keeps the contract clean
//! for adapters that never need it.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{RepoPath, Task};
use crate::domain::ports::{AdapterResult, EngineAdapter, HealthStatus};
use crate::services::circuit_breaker::{target_key, CircuitBreakerRegistry, CircuitDecision};
use crate::services::dead_letter_queue::DeadLetterQueue;
use crate::services::retry_executor::{execute_with_retry, RetryConfig};

/// Decorates one [`EngineAdapter`] with resilience policy.
pub struct ResilientAdapter {
    inner: Arc<dyn EngineAdapter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry_config: RetryConfig,
    dlq: Arc<DeadLetterQueue>,
}

impl ResilientAdapter {
    /// Wrap `inner` with `breakers`/`retry_config`/`dlq`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn EngineAdapter>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry_config: RetryConfig,
        dlq: Arc<DeadLetterQueue>,
    ) -> Self {
        Self { inner, breakers, retry_config, dlq }
    }

    /// The wrapped adapter's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Pass through to the wrapped adapter's health probe.
    pub async fn health(&self) -> HealthStatus {
        self.inner.health().await
    }

    fn composite_target(&self, repos: &[RepoPath]) -> String {
        let joined = repos.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        target_key(self.inner.name(), &joined)
    }

    /// Execute `task` against `repos` on behalf of `workflow_id`, applying
    /// the full resilience sequence (§4.5 steps 1-4).
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::CircuitOpen`] immediately if the breaker
    /// refuses the call; otherwise propagates the wrapped adapter's error
    /// once retries are exhausted (after recording it to the breaker and
    /// the DLQ).
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        task: &Task,
        repos: &[RepoPath],
    ) -> Result<AdapterResult, MahavishnuError> {
        let target = self.composite_target(repos);

        match self.breakers.before_call(&target).await {
            CircuitDecision::Refuse { retry_after_secs } => {
                return Err(MahavishnuError::CircuitOpen { target, retry_after_secs });
            }
            CircuitDecision::Proceed | CircuitDecision::ProbePermitted => {}
        }

        let inner = &self.inner;
        let result = execute_with_retry(self.retry_config, || inner.execute(task, repos)).await;

        // The Execution Engine always calls with exactly one repo (§4.6 step
        // 4). An adapter may report that single repo as failed inside an
        // `Ok` result rather than raising; treat that the same as a thrown
        // error so it still trips the breaker and reaches the DLQ (§7
        // "terminal per-repo failures become DLQ entries").
        let result = match result {
            Ok(value) if repos.len() == 1 && value.repos_failed.iter().any(|(r, _)| r == &repos[0]) => {
                let message = value
                    .repos_failed
                    .into_iter()
                    .find(|(r, _)| r == &repos[0])
                    .map(|(_, message)| message)
                    .unwrap_or_else(|| "adapter reported this repo as failed".to_string());
                Err(MahavishnuError::Internal(message))
            }
            other => other,
        };

        match result {
            Ok(value) => {
                self.breakers.record_success(&target).await;
                Ok(value)
            }
            Err(err) => {
                self.breakers.record_failure(&target).await;
                if let Err(dlq_err) = self
                    .dlq
                    .enqueue(
                        workflow_id,
                        task.clone(),
                        repos.to_vec(),
                        self.inner.name().to_string(),
                        &err,
                        std::collections::HashMap::new(),
                    )
                    .await
                {
                    warn!(workflow_id = %workflow_id, error = %dlq_err, "resilient adapter: failed to enqueue dlq entry");
                    return Err(dlq_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_engine::MockEngineAdapter;
    use crate::adapters::sqlite::{all_embedded_migrations, connection::create_test_pool, Migrator, SqliteDlqRepository};
    use crate::domain::models::CircuitBreakerConfig;
    use crate::services::event_bus::EventBus;
    use std::collections::HashMap;
    use std::path::PathBuf;

    async fn dlq() -> Arc<DeadLetterQueue> {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        Arc::new(DeadLetterQueue::new(Arc::new(SqliteDlqRepository::new(pool)), EventBus::new(32)))
    }

    fn repo(p: &str) -> RepoPath {
        RepoPath::new_unchecked(PathBuf::from(p))
    }

    #[tokio::test]
    async fn successful_call_records_breaker_success_and_no_dlq_entry() {
        let dlq = dlq().await;
        let adapter = ResilientAdapter::new(
            Arc::new(MockEngineAdapter::new("mock")),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32))),
            RetryConfig { max_attempts: 1, ..RetryConfig::default() },
            dlq.clone(),
        );
        let task = Task::new("t1", "sweep", HashMap::new()).unwrap();
        let result = adapter.execute(Uuid::new_v4(), &task, &[repo("/r/a")]).await.unwrap();
        assert_eq!(dlq.size().await.unwrap(), 0);
        assert!(result.repos_failed.is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_enqueues_a_dlq_entry() {
        let dlq = dlq().await;
        // MockEngineAdapter marks repos success/failure per-repo rather than
        // raising, so drive a genuine adapter error with a task id that the
        // mock still accepts but via a repo-less call that fails validation
        // upstream instead: exercise the path with a custom failing adapter.
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl EngineAdapter for AlwaysFails {
            fn name(&self) -> &str { "always-fails" }
            async fn execute(&self, _task: &Task, _repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError> {
                Err(MahavishnuError::Permission("denied".into()))
            }
            fn validate(&self, _task: &Task, _repos: &[RepoPath]) -> bool { true }
            async fn health(&self) -> HealthStatus {
                HealthStatus { status: crate::domain::ports::HealthState::Healthy, details: "ok".into() }
            }
        }

        let adapter = ResilientAdapter::new(
            Arc::new(AlwaysFails),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32))),
            RetryConfig { max_attempts: 1, ..RetryConfig::default() },
            dlq.clone(),
        );
        let task = Task::new("t1", "sweep", HashMap::new()).unwrap();
        let workflow_id = Uuid::new_v4();
        let err = adapter.execute(workflow_id, &task, &[repo("/r/b")]).await.unwrap_err();
        assert!(matches!(err, MahavishnuError::Permission(_)));
        assert_eq!(dlq.size().await.unwrap(), 1);
        let entries = dlq.list(None).await.unwrap();
        assert_eq!(entries[0].workflow_id, workflow_id);
        assert_eq!(entries[0].error_kind, "Permission");
    }

    #[tokio::test]
    async fn open_breaker_refuses_before_invoking_the_adapter() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingFailAdapter(AtomicU32);
        #[async_trait::async_trait]
        impl EngineAdapter for CountingFailAdapter {
            fn name(&self) -> &str { "counting-fail" }
            async fn execute(&self, _task: &Task, _repos: &[RepoPath]) -> Result<AdapterResult, MahavishnuError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(MahavishnuError::Permission("denied".into()))
            }
            fn validate(&self, _task: &Task, _repos: &[RepoPath]) -> bool { true }
            async fn health(&self) -> HealthStatus {
                HealthStatus { status: crate::domain::ports::HealthState::Healthy, details: "ok".into() }
            }
        }

        let dlq = dlq().await;
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig { failure_threshold: 1, timeout_seconds: 3600, success_threshold: 1 },
            EventBus::new(32),
        ));
        let counting = Arc::new(CountingFailAdapter(AtomicU32::new(0)));
        let adapter = ResilientAdapter::new(counting.clone(), breakers, RetryConfig { max_attempts: 1, ..RetryConfig::default() }, dlq);
        let task = Task::new("t1", "sweep", HashMap::new()).unwrap();

        // First call fails and trips the breaker (threshold 1).
        adapter.execute(Uuid::new_v4(), &task, &[repo("/r/a")]).await.ok();
        let calls_before = counting.0.load(Ordering::SeqCst);
        let err = adapter.execute(Uuid::new_v4(), &task, &[repo("/r/a")]).await.unwrap_err();
        assert!(matches!(err, MahavishnuError::CircuitOpen { .. }));
        assert_eq!(counting.0.load(Ordering::SeqCst), calls_before, "adapter must not be invoked while breaker is open");
    }
}
