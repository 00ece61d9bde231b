//! SQLite implementation of [`WorkflowRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{FailedRepo, RepoPath, Task, Workflow, WorkflowStatus};
use crate::domain::ports::{WorkflowFilter, WorkflowRepository};

pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let row = WorkflowRow::from_domain(workflow)?;
        sqlx::query(
            r#"INSERT INTO workflows
               (workflow_id, task_json, repos_json, engine, created_at, started_at, completed_at,
                status, successful_repos_json, failed_repos_json, execution_time_seconds)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&row.workflow_id)
        .bind(&row.task_json)
        .bind(&row.repos_json)
        .bind(&row.engine)
        .bind(&row.created_at)
        .bind(&row.started_at)
        .bind(&row.completed_at)
        .bind(&row.status)
        .bind(&row.successful_repos_json)
        .bind(&row.failed_repos_json)
        .bind(row.execution_time_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let row = WorkflowRow::from_domain(workflow)?;
        let result = sqlx::query(
            r#"UPDATE workflows SET
                started_at = ?, completed_at = ?, status = ?,
                successful_repos_json = ?, failed_repos_json = ?, execution_time_seconds = ?
               WHERE workflow_id = ?"#,
        )
        .bind(&row.started_at)
        .bind(&row.completed_at)
        .bind(&row.status)
        .bind(&row.successful_repos_json)
        .bind(&row.failed_repos_json)
        .bind(row.execution_time_seconds)
        .bind(&row.workflow_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(workflow.workflow_id));
        }
        Ok(())
    }

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: Option<WorkflowFilter>) -> Result<Vec<Workflow>, StoreError> {
        let filter = filter.unwrap_or_default();
        let rows: Vec<WorkflowRow> = match (&filter.status, &filter.engine) {
            (Some(status), Some(engine)) => {
                sqlx::query_as(
                    "SELECT * FROM workflows WHERE status = ? AND engine = ? ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .bind(engine)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query_as("SELECT * FROM workflows WHERE status = ? ORDER BY created_at DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(engine)) => {
                sqlx::query_as("SELECT * FROM workflows WHERE engine = ? ORDER BY created_at DESC")
                    .bind(engine)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query_as("SELECT * FROM workflows ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    workflow_id: String,
    task_json: String,
    repos_json: String,
    engine: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    status: String,
    successful_repos_json: String,
    failed_repos_json: String,
    execution_time_seconds: Option<f64>,
}

impl WorkflowRow {
    fn from_domain(workflow: &Workflow) -> Result<Self, StoreError> {
        Ok(Self {
            workflow_id: workflow.workflow_id.to_string(),
            task_json: serde_json::to_string(&workflow.task)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            repos_json: serde_json::to_string(&workflow.repos)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            engine: workflow.engine.clone(),
            created_at: workflow.created_at.to_rfc3339(),
            started_at: workflow.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: workflow.completed_at.map(|dt| dt.to_rfc3339()),
            status: workflow.status.as_str().to_string(),
            successful_repos_json: serde_json::to_string(&workflow.successful_repos)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            failed_repos_json: serde_json::to_string(&workflow.failed_repos)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            execution_time_seconds: workflow.execution_time_seconds,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let workflow_id = Uuid::parse_str(&row.workflow_id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let task: Task = serde_json::from_str(&row.task_json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let repos: Vec<RepoPath> =
            serde_json::from_str(&row.repos_json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let status = WorkflowStatus::from_str(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid workflow status: {}", row.status)))?;
        let successful_repos: Vec<RepoPath> =
            serde_json::from_str(&row.successful_repos_json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let failed_repos: Vec<FailedRepo> =
            serde_json::from_str(&row.failed_repos_json).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(Self {
            workflow_id,
            task,
            repos,
            engine: row.engine,
            created_at: parse_rfc3339(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_rfc3339).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_rfc3339).transpose()?,
            status,
            successful_repos,
            failed_repos,
            execution_time_seconds: row.execution_time_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, connection::create_test_pool, Migrator};
    use std::collections::HashMap;
    use std::path::PathBuf;

    async fn setup() -> SqliteWorkflowRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SqliteWorkflowRepository::new(pool)
    }

    fn sample_workflow() -> Workflow {
        let task = Task::new("t1", "sweep", HashMap::new()).unwrap();
        Workflow::new(task, vec![RepoPath::new_unchecked(PathBuf::from("/r/a"))], "mock")
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let repo = setup().await;
        let workflow = sample_workflow();
        repo.create(&workflow).await.unwrap();

        let fetched = repo.get(workflow.workflow_id).await.unwrap().unwrap();
        assert_eq!(fetched.workflow_id, workflow.workflow_id);
        assert_eq!(fetched.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn update_persists_terminal_status() {
        let repo = setup().await;
        let mut workflow = sample_workflow();
        repo.create(&workflow).await.unwrap();

        workflow.mark_started();
        workflow.finalize(workflow.repos.clone(), vec![]);
        repo.update(&workflow).await.unwrap();

        let fetched = repo.get(workflow.workflow_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, WorkflowStatus::Success);
        assert!(fetched.execution_time_seconds.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let repo = setup().await;
        let mut done = sample_workflow();
        repo.create(&done).await.unwrap();
        done.mark_started();
        done.finalize(done.repos.clone(), vec![]);
        repo.update(&done).await.unwrap();

        let pending = sample_workflow();
        repo.create(&pending).await.unwrap();

        let filter = WorkflowFilter { status: Some(WorkflowStatus::Success), engine: None };
        let results = repo.list(Some(filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].workflow_id, done.workflow_id);
    }
}
