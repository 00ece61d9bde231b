//! SQLite implementation of [`DlqRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{DlqEntry, DlqFilter, RepoPath, Task};
use crate::domain::ports::DlqRepository;

pub struct SqliteDlqRepository {
    pool: SqlitePool,
}

impl SqliteDlqRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DlqRepository for SqliteDlqRepository {
    async fn enqueue(&self, entry: &DlqEntry) -> Result<(), StoreError> {
        let row = DlqRow::from_domain(entry)?;
        sqlx::query(
            r#"INSERT INTO dlq_entries
               (id, workflow_id, task_json, repos_json, engine, error, error_kind, timestamp, metadata_json)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&row.id)
        .bind(&row.workflow_id)
        .bind(&row.task_json)
        .bind(&row.repos_json)
        .bind(&row.engine)
        .bind(&row.error)
        .bind(&row.error_kind)
        .bind(&row.timestamp)
        .bind(&row.metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: Option<DlqFilter>) -> Result<Vec<DlqEntry>, StoreError> {
        let filter = filter.unwrap_or_default();
        let rows: Vec<DlqRow> = match (&filter.workflow_id, &filter.error_kind) {
            (Some(workflow_id), Some(kind)) => {
                sqlx::query_as(
                    "SELECT * FROM dlq_entries WHERE workflow_id = ? AND error_kind = ? ORDER BY timestamp DESC",
                )
                .bind(workflow_id.to_string())
                .bind(kind)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(workflow_id), None) => {
                sqlx::query_as("SELECT * FROM dlq_entries WHERE workflow_id = ? ORDER BY timestamp DESC")
                    .bind(workflow_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(kind)) => {
                sqlx::query_as("SELECT * FROM dlq_entries WHERE error_kind = ? ORDER BY timestamp DESC")
                    .bind(kind)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query_as("SELECT * FROM dlq_entries ORDER BY timestamp DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, StoreError> {
        let row: Option<DlqRow> = sqlx::query_as("SELECT * FROM dlq_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dlq_entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn size(&self) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dlq_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn purge(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM dlq_entries WHERE timestamp < ?")
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[derive(sqlx::FromRow)]
struct DlqRow {
    id: String,
    workflow_id: String,
    task_json: String,
    repos_json: String,
    engine: String,
    error: String,
    error_kind: String,
    timestamp: String,
    metadata_json: String,
}

impl DlqRow {
    fn from_domain(entry: &DlqEntry) -> Result<Self, StoreError> {
        Ok(Self {
            id: entry.id.to_string(),
            workflow_id: entry.workflow_id.to_string(),
            task_json: serde_json::to_string(&entry.task).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            repos_json: serde_json::to_string(&entry.repos).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            engine: entry.engine.clone(),
            error: entry.error.clone(),
            error_kind: entry.error_kind.clone(),
            timestamp: entry.timestamp.to_rfc3339(),
            metadata_json: serde_json::to_string(&entry.metadata).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        })
    }
}

impl TryFrom<DlqRow> for DlqEntry {
    type Error = StoreError;

    fn try_from(row: DlqRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            workflow_id: Uuid::parse_str(&row.workflow_id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            task: serde_json::from_str::<Task>(&row.task_json).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            repos: serde_json::from_str::<Vec<RepoPath>>(&row.repos_json)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            engine: row.engine,
            error: row.error,
            error_kind: row.error_kind,
            timestamp: DateTime::parse_from_rfc3339(&row.timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            metadata: serde_json::from_str(&row.metadata_json).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, connection::create_test_pool, Migrator};
    use std::collections::HashMap;
    use std::path::PathBuf;

    async fn setup() -> SqliteDlqRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SqliteDlqRepository::new(pool)
    }

    fn sample_entry() -> DlqEntry {
        let task = Task::new("t1", "sweep", HashMap::new()).unwrap();
        DlqEntry::new(
            Uuid::new_v4(),
            task,
            vec![RepoPath::new_unchecked(PathBuf::from("/r/a"))],
            "mock",
            "boom",
            "Transient",
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn enqueue_then_get_round_trips() {
        let repo = setup().await;
        let entry = sample_entry();
        repo.enqueue(&entry).await.unwrap();

        let fetched = repo.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[tokio::test]
    async fn remove_makes_entry_unfindable() {
        let repo = setup().await;
        let entry = sample_entry();
        repo.enqueue(&entry).await.unwrap();
        repo.remove(entry.id).await.unwrap();
        assert!(repo.get(entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn size_and_list_reflect_enqueued_entries() {
        let repo = setup().await;
        repo.enqueue(&sample_entry()).await.unwrap();
        repo.enqueue(&sample_entry()).await.unwrap();
        assert_eq!(repo.size().await.unwrap(), 2);
        assert_eq!(repo.list(None).await.unwrap().len(), 2);
    }
}
