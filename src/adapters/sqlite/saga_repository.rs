//! SQLite implementation of [`SagaRepository`].
//!
//! `record_idempotency` writes the idempotency row and the saga row update
//! in one transaction, satisfying §4.8's persistence-atomicity option (a).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{IdempotencyRecord, Saga, SagaStatus};
use crate::domain::ports::SagaRepository;

pub struct SqliteSagaRepository {
    pool: SqlitePool,
}

impl SqliteSagaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SagaRepository for SqliteSagaRepository {
    async fn upsert(&self, saga: &Saga) -> Result<(), StoreError> {
        let row = SagaRow::from_domain(saga)?;
        sqlx::query(
            r#"INSERT INTO sagas
               (saga_id, saga_type, status, current_step_index, completed_steps_json,
                state_json, retry_count, error_message, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(saga_id) DO UPDATE SET
                 status = excluded.status,
                 current_step_index = excluded.current_step_index,
                 completed_steps_json = excluded.completed_steps_json,
                 state_json = excluded.state_json,
                 retry_count = excluded.retry_count,
                 error_message = excluded.error_message,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&row.saga_id)
        .bind(&row.saga_type)
        .bind(&row.status)
        .bind(row.current_step_index)
        .bind(&row.completed_steps_json)
        .bind(&row.state_json)
        .bind(row.retry_count)
        .bind(&row.error_message)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<Saga>, StoreError> {
        let row: Option<SagaRow> = sqlx::query_as("SELECT * FROM sagas WHERE saga_id = ?")
            .bind(saga_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<Saga>, StoreError> {
        let rows: Vec<SagaRow> = if let Some(status) = status {
            sqlx::query_as("SELECT * FROM sagas WHERE status = ? ORDER BY updated_at DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT * FROM sagas ORDER BY updated_at DESC")
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_idempotency(&self, saga: &Saga, record: &IdempotencyRecord) -> Result<(), StoreError> {
        let row = SagaRow::from_domain(saga)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT OR IGNORE INTO idempotency_records
               (saga_id, step_name, idempotency_key, namespace, executed_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(record.saga_id.to_string())
        .bind(&record.step_name)
        .bind(&record.idempotency_key)
        .bind(&record.namespace)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO sagas
               (saga_id, saga_type, status, current_step_index, completed_steps_json,
                state_json, retry_count, error_message, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(saga_id) DO UPDATE SET
                 status = excluded.status,
                 current_step_index = excluded.current_step_index,
                 completed_steps_json = excluded.completed_steps_json,
                 state_json = excluded.state_json,
                 retry_count = excluded.retry_count,
                 error_message = excluded.error_message,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&row.saga_id)
        .bind(&row.saga_type)
        .bind(&row.status)
        .bind(row.current_step_index)
        .bind(&row.completed_steps_json)
        .bind(&row.state_json)
        .bind(row.retry_count)
        .bind(&row.error_message)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn has_executed(
        &self,
        saga_id: Uuid,
        step_name: &str,
        idempotency_key: &str,
        namespace: &str,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM idempotency_records WHERE saga_id = ? AND step_name = ? AND idempotency_key = ? AND namespace = ?",
        )
        .bind(saga_id.to_string())
        .bind(step_name)
        .bind(idempotency_key)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[derive(sqlx::FromRow)]
struct SagaRow {
    saga_id: String,
    saga_type: String,
    status: String,
    current_step_index: i64,
    completed_steps_json: String,
    state_json: String,
    retry_count: i64,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SagaRow {
    fn from_domain(saga: &Saga) -> Result<Self, StoreError> {
        Ok(Self {
            saga_id: saga.saga_id.to_string(),
            saga_type: saga.saga_type.clone(),
            status: saga.status.as_str().to_string(),
            current_step_index: saga.current_step_index as i64,
            completed_steps_json: serde_json::to_string(&saga.completed_steps)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            state_json: saga.state.to_string(),
            retry_count: i64::from(saga.retry_count),
            error_message: saga.error_message.clone(),
            created_at: saga.created_at.to_rfc3339(),
            updated_at: saga.updated_at.to_rfc3339(),
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl TryFrom<SagaRow> for Saga {
    type Error = StoreError;

    fn try_from(row: SagaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            saga_id: Uuid::parse_str(&row.saga_id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            saga_type: row.saga_type,
            status: SagaStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("invalid saga status: {}", row.status)))?,
            current_step_index: row.current_step_index as usize,
            completed_steps: serde_json::from_str(&row.completed_steps_json)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            state: serde_json::from_str(&row.state_json).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            retry_count: row.retry_count as u32,
            error_message: row.error_message,
            created_at: parse_rfc3339(&row.created_at)?,
            updated_at: parse_rfc3339(&row.updated_at)?,
        })
    }
}
