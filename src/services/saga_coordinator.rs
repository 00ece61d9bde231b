//! Saga Coordinator: persistent, crash-recoverable, compensating
//! distributed-transaction runner (§4.8, §8 properties 5-6).
//!
//! Step behavior lives here, not in `domain::models::saga`: a step is a pair
//! of async closures plus a stable idempotency key, held behind `Arc<dyn Fn>`
//! so callers can build a saga definition from ordinary function items or
//! closures without the coordinator needing a generic parameter per saga
//! shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{IdempotencyRecord, Saga, SagaStatus};
use crate::domain::ports::SagaRepository;
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::event_bus::{kind, EventBus};
use crate::services::retry_executor::{execute_with_retry, RetryConfig};

type StepFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, MahavishnuError>> + Send + Sync>;
type CompensateFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), MahavishnuError>> + Send + Sync>;

/// One ordered step of a saga: an idempotent forward action and its
/// compensation (§3 "Saga Step").
#[derive(Clone)]
pub struct SagaStep {
    /// Step name; identity within a saga is position plus name.
    pub name: String,
    /// Stable key guarding at-most-once observable execution.
    pub idempotency_key: String,
    execute: StepFn,
    compensate: CompensateFn,
}

impl SagaStep {
    /// Build a step from plain async closures.
    pub fn new<E, EFut, C, CFut>(name: impl Into<String>, idempotency_key: impl Into<String>, execute: E, compensate: C) -> Self
    where
        E: Fn(Value) -> EFut + Send + Sync + 'static,
        EFut: std::future::Future<Output = Result<Value, MahavishnuError>> + Send + 'static,
        C: Fn(Value) -> CFut + Send + Sync + 'static,
        CFut: std::future::Future<Output = Result<(), MahavishnuError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            idempotency_key: idempotency_key.into(),
            execute: Arc::new(move |state| Box::pin(execute(state))),
            compensate: Arc::new(move |state| Box::pin(compensate(state))),
        }
    }
}

/// Tunables for saga step execution and compensation retries.
#[derive(Debug, Clone, Copy)]
pub struct SagaCoordinatorConfig {
    /// Retry/backoff policy applied to both `execute` and `compensate` (§4.8).
    pub retry: RetryConfig,
    /// How long a saga may sit in `in_progress`/`compensating` before the
    /// orphan sweep flags it (§4.8 "Orphan detection").
    pub orphan_threshold: Duration,
}

impl Default for SagaCoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig { max_attempts: 3, ..RetryConfig::default() },
            orphan_threshold: Duration::from_secs(3600),
        }
    }
}

fn merge_delta(state: &mut Value, delta: Value) {
    if let (Value::Object(state_map), Value::Object(delta_map)) = (state, delta) {
        for (k, v) in delta_map {
            state_map.insert(k, v);
        }
    }
}

fn step_breaker_target(saga_type: &str, step_name: &str) -> String {
    format!("saga:{saga_type}:{step_name}")
}

/// Executes ordered saga step sequences with idempotency, retry,
/// compensation and crash recovery (§4.8).
pub struct SagaCoordinator {
    repository: Arc<dyn SagaRepository>,
    breakers: Arc<CircuitBreakerRegistry>,
    events: EventBus,
    config: SagaCoordinatorConfig,
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SagaCoordinator {
    /// Build a coordinator backed by `repository`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn SagaRepository>,
        breakers: Arc<CircuitBreakerRegistry>,
        events: EventBus,
        config: SagaCoordinatorConfig,
    ) -> Self {
        Self { repository, breakers, events, config, locks: RwLock::new(HashMap::new()) }
    }

    async fn lock_for(&self, saga_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().await.get(&saga_id) {
            return existing.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(saga_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Execute (or resume) the saga identified by `saga_id` (§4.8 steps 1-4).
    ///
    /// An advisory per-`saga_id` lock is held for the duration of the call,
    /// so concurrent `execute_saga` calls for the same id serialize rather
    /// than interleave (§5).
    pub async fn execute_saga(
        &self,
        saga_id: Uuid,
        saga_type: impl Into<String>,
        steps: Vec<SagaStep>,
        initial_state: Value,
    ) -> Result<Saga, MahavishnuError> {
        let saga_type = saga_type.into();
        let lock = self.lock_for(saga_id).await;
        let _guard = lock.lock().await;

        let mut saga = match self.repository.get(saga_id).await? {
            Some(existing) => existing,
            None => {
                let fresh = Saga::new(saga_id, saga_type.clone(), initial_state);
                self.repository.upsert(&fresh).await?;
                self.events.publish(crate::domain::models::Event::for_id(kind::SAGA_CREATED, saga_id, serde_json::json!({})));
                fresh
            }
        };

        if saga.status == SagaStatus::Pending {
            saga.status = SagaStatus::InProgress;
            saga.updated_at = Utc::now();
            self.repository.upsert(&saga).await?;
        }

        if saga.status == SagaStatus::Completed || saga.status == SagaStatus::Failed {
            return Ok(saga);
        }

        if saga.status == SagaStatus::Compensating {
            return self.compensate(saga, &steps).await;
        }

        for (i, step) in steps.iter().enumerate().skip(saga.current_step_index) {
            let already_executed = self.repository.has_executed(saga_id, &step.name, &step.idempotency_key, "execute").await?;
            if already_executed {
                if !saga.completed_steps.contains(&i) {
                    saga.completed_steps.push(i);
                }
                saga.current_step_index = i + 1;
                saga.updated_at = Utc::now();
                self.repository.upsert(&saga).await?;
                continue;
            }

            let target = step_breaker_target(&saga_type, &step.name);
            if matches!(
                self.breakers.before_call(&target).await,
                crate::services::circuit_breaker::CircuitDecision::Refuse { .. }
            ) {
                saga.error_message = Some(format!("step '{}' failed: circuit open", step.name));
                saga.updated_at = Utc::now();
                self.repository.upsert(&saga).await?;
                return self.compensate(saga, &steps).await;
            }

            let execute_fn = step.execute.clone();
            let state_for_step = saga.state.clone();
            let outcome = execute_with_retry(self.config.retry, || {
                let execute_fn = execute_fn.clone();
                let state = state_for_step.clone();
                async move { (execute_fn)(state).await }
            })
            .await;

            match outcome {
                Ok(delta) => {
                    self.breakers.record_success(&target).await;
                    merge_delta(&mut saga.state, delta);
                    saga.completed_steps.push(i);
                    saga.current_step_index = i + 1;
                    saga.retry_count = 0;
                    saga.updated_at = Utc::now();

                    let record = IdempotencyRecord {
                        saga_id,
                        step_name: step.name.clone(),
                        idempotency_key: step.idempotency_key.clone(),
                        namespace: "execute".to_string(),
                    };
                    self.repository.record_idempotency(&saga, &record).await?;
                    self.events.publish(crate::domain::models::Event::for_id(
                        kind::SAGA_STEP_SUCCEEDED,
                        saga_id,
                        serde_json::json!({ "step": step.name, "index": i }),
                    ));
                }
                Err(err) => {
                    self.breakers.record_failure(&target).await;
                    warn!(saga_id = %saga_id, step = %step.name, error = %err, "saga coordinator: step exhausted retries");
                    self.events.publish(crate::domain::models::Event::for_id(
                        kind::SAGA_STEP_FAILED,
                        saga_id,
                        serde_json::json!({ "step": step.name, "index": i, "error": err.to_string() }),
                    ));
                    saga.error_message = Some(format!("step '{}' failed: {err}", step.name));
                    saga.updated_at = Utc::now();
                    self.repository.upsert(&saga).await?;
                    return self.compensate(saga, &steps).await;
                }
            }
        }

        saga.status = SagaStatus::Completed;
        saga.updated_at = Utc::now();
        self.repository.upsert(&saga).await?;
        self.events.publish(crate::domain::models::Event::for_id(kind::SAGA_COMPLETED, saga_id, serde_json::json!({})));
        info!(saga_id = %saga_id, "saga coordinator: saga completed");
        Ok(saga)
    }

    async fn compensate(&self, mut saga: Saga, steps: &[SagaStep]) -> Result<Saga, MahavishnuError> {
        if saga.status != SagaStatus::Compensating {
            saga.status = SagaStatus::Compensating;
            saga.updated_at = Utc::now();
            self.repository.upsert(&saga).await?;
            self.events.publish(crate::domain::models::Event::for_id(kind::SAGA_COMPENSATING, saga.saga_id, serde_json::json!({})));
        }

        let to_compensate: Vec<usize> = saga.completed_steps.iter().copied().rev().collect();
        for idx in to_compensate {
            let Some(step) = steps.get(idx) else { continue };

            let already_compensated = self
                .repository
                .has_executed(saga.saga_id, &step.name, &step.idempotency_key, "compensate")
                .await?;
            if already_compensated {
                continue;
            }

            let compensate_fn = step.compensate.clone();
            let state_for_step = saga.state.clone();
            let outcome = execute_with_retry(self.config.retry, || {
                let compensate_fn = compensate_fn.clone();
                let state = state_for_step.clone();
                async move { (compensate_fn)(state).await }
            })
            .await;

            match outcome {
                Ok(()) => {
                    let record = IdempotencyRecord {
                        saga_id: saga.saga_id,
                        step_name: step.name.clone(),
                        idempotency_key: step.idempotency_key.clone(),
                        namespace: "compensate".to_string(),
                    };
                    self.repository.record_idempotency(&saga, &record).await?;
                }
                Err(err) => {
                    error!(saga_id = %saga.saga_id, step = %step.name, error = %err, "saga coordinator: compensation failed; continuing best-effort");
                }
            }
        }

        saga.status = SagaStatus::Failed;
        saga.updated_at = Utc::now();
        self.repository.upsert(&saga).await?;
        self.events.publish(crate::domain::models::Event::for_id(kind::SAGA_FAILED, saga.saga_id, serde_json::json!({})));
        warn!(saga_id = %saga.saga_id, error = ?saga.error_message, "saga coordinator: saga failed after compensation");
        Ok(saga)
    }

    /// Fetch one saga by id.
    pub async fn get_saga(&self, saga_id: Uuid) -> Result<Option<Saga>, MahavishnuError> {
        Ok(self.repository.get(saga_id).await?)
    }

    /// List sagas, optionally filtered by status.
    pub async fn list_sagas(&self, status: Option<SagaStatus>) -> Result<Vec<Saga>, MahavishnuError> {
        Ok(self.repository.list(status).await?)
    }

    /// Resume every saga sitting in `in_progress` or `compensating`,
    /// re-running `execute_saga` for each against `steps_by_type` (§4.8
    /// "Crash recovery"). Sagas of a type absent from `steps_by_type` are
    /// skipped and logged, since step closures cannot be reconstructed from
    /// persisted state alone.
    pub async fn recover_incomplete_sagas(&self, steps_by_type: &HashMap<String, Vec<SagaStep>>) -> Result<Vec<Saga>, MahavishnuError> {
        let mut recovered = Vec::new();
        for status in [SagaStatus::InProgress, SagaStatus::Compensating] {
            for saga in self.repository.list(Some(status)).await? {
                let Some(steps) = steps_by_type.get(&saga.saga_type) else {
                    warn!(saga_id = %saga.saga_id, saga_type = %saga.saga_type, "saga coordinator: no step definitions registered for recovery");
                    continue;
                };
                let state = saga.state.clone();
                let resumed = self.execute_saga(saga.saga_id, saga.saga_type.clone(), steps.clone(), state).await?;
                recovered.push(resumed);
            }
        }
        Ok(recovered)
    }

    /// Sagas stuck in `in_progress`/`compensating` past the configured
    /// threshold, for human attention (§4.8 "Orphan detection"). Never
    /// auto-aborts.
    pub async fn find_orphaned_sagas(&self) -> Result<Vec<Saga>, MahavishnuError> {
        let threshold = chrono::Duration::from_std(self.config.orphan_threshold)
            .map_err(|e| MahavishnuError::Internal(e.to_string()))?;
        let now = Utc::now();
        let mut orphans = Vec::new();
        for status in [SagaStatus::InProgress, SagaStatus::Compensating] {
            for saga in self.repository.list(Some(status)).await? {
                if now - saga.updated_at >= threshold {
                    orphans.push(saga);
                }
            }
        }
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, connection::create_test_pool, Migrator, SqliteSagaRepository};
    use crate::domain::models::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn coordinator() -> SagaCoordinator {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SagaCoordinator::new(
            Arc::new(SqliteSagaRepository::new(pool)),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::new(32))),
            EventBus::new(64),
            SagaCoordinatorConfig { retry: RetryConfig { max_attempts: 2, base_delay: Duration::from_millis(1), jitter: false, ..RetryConfig::default() }, ..SagaCoordinatorConfig::default() },
        )
    }

    fn counting_step(name: &str, calls: Arc<AtomicU32>) -> SagaStep {
        SagaStep::new(
            name,
            format!("{name}-key"),
            move |mut state| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Value::Object(map) = &mut state {
                        map.insert("touched".into(), Value::Bool(true));
                    }
                    Ok(state)
                }
            },
            |_state| async { Ok(()) },
        )
    }

    fn failing_step(name: &str) -> SagaStep {
        SagaStep::new(name, format!("{name}-key"), |_state| async { Err(MahavishnuError::Transient("boom".into())) }, |_state| async { Ok(()) })
    }

    #[tokio::test]
    async fn all_steps_succeed_completes_the_saga() {
        let coordinator = coordinator().await;
        let calls = Arc::new(AtomicU32::new(0));
        let steps = vec![counting_step("A", calls.clone()), counting_step("B", calls.clone())];
        let saga_id = Uuid::new_v4();

        let saga = coordinator.execute_saga(saga_id, "t", steps, serde_json::json!({})).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(saga.completed_steps, vec![0, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_failing_step_triggers_reverse_order_compensation() {
        let compensated = Arc::new(Mutex::new(Vec::<String>::new()));

        let make_step = |name: &'static str| {
            let compensated = compensated.clone();
            SagaStep::new(
                name,
                format!("{name}-key"),
                |state| async move { Ok(state) },
                move |_state| {
                    let compensated = compensated.clone();
                    async move {
                        compensated.lock().await.push(name.to_string());
                        Ok(())
                    }
                },
            )
        };

        let coordinator = coordinator().await;
        let steps = vec![make_step("A"), make_step("B"), failing_step("C")];
        let saga_id = Uuid::new_v4();

        let saga = coordinator.execute_saga(saga_id, "t", steps, serde_json::json!({})).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
        assert!(saga.error_message.as_ref().unwrap().contains('C'));
        assert_eq!(*compensated.lock().await, vec!["B".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn resuming_a_completed_step_does_not_re_execute_it() {
        let coordinator = coordinator().await;
        let calls = Arc::new(AtomicU32::new(0));
        let saga_id = Uuid::new_v4();

        let first_pass = vec![counting_step("A", calls.clone())];
        coordinator.execute_saga(saga_id, "t", first_pass, serde_json::json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second_pass = vec![counting_step("A", calls.clone()), counting_step("B", calls.clone())];
        let saga = coordinator.execute_saga(saga_id, "t", second_pass, serde_json::json!({})).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        // Step A is skipped on resume (idempotency record already present);
        // only B actually runs.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn orphan_sweep_is_empty_for_a_freshly_completed_saga() {
        let coordinator = coordinator().await;
        let calls = Arc::new(AtomicU32::new(0));
        let saga_id = Uuid::new_v4();
        coordinator.execute_saga(saga_id, "t", vec![counting_step("A", calls)], serde_json::json!({})).await.unwrap();
        assert!(coordinator.find_orphaned_sagas().await.unwrap().is_empty());
    }
}
