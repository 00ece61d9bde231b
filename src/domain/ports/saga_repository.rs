//! Saga and idempotency repository ports (§4.8, §6).

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{IdempotencyRecord, Saga, SagaStatus};

/// Durable storage for saga rows and their idempotency records.
///
/// Per §4.8's persistence-atomicity requirement, `upsert` is expected to
/// write the saga row transactionally with whatever idempotency record the
/// caller wrote alongside it; see `services::saga_coordinator` for how the
/// sqlite implementation composes the two in one transaction.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Insert or overwrite a saga row.
    async fn upsert(&self, saga: &Saga) -> Result<(), StoreError>;

    /// Fetch one saga by id.
    async fn get(&self, saga_id: Uuid) -> Result<Option<Saga>, StoreError>;

    /// List sagas, optionally filtered by status.
    async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<Saga>, StoreError>;

    /// Record that `(saga_id, step_name, idempotency_key)` under `namespace`
    /// has executed, in the same transaction as the saga row update that
    /// reflects it.
    async fn record_idempotency(&self, saga: &Saga, record: &IdempotencyRecord) -> Result<(), StoreError>;

    /// Check whether a step (or its compensation) has already executed.
    async fn has_executed(&self, saga_id: Uuid, step_name: &str, idempotency_key: &str, namespace: &str) -> Result<bool, StoreError>;
}
