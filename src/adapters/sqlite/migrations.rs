//! SQLite database migration management.
//!
//! Migrations are embedded as Rust structs rather than `.sql` files on disk,
//! so tests can spin up a fully-migrated `:memory:` database with no
//! filesystem setup.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError { version: i64, #[source] source: sqlx::Error },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_embedded_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current_version).collect();

        if pending.is_empty() {
            return Ok(0);
        }

        for migration in &pending {
            self.apply_migration(migration).await?;
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(result.map(|(v,)| v).unwrap_or(0))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        sqlx::raw_sql(&migration.sql)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::ExecutionError { version: migration.version, source: e })?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(&migration.description)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::ExecutionError { version: migration.version, source: e })?;

        Ok(())
    }
}

/// Schema for the core's four durable stores (§6 persistent state layout).
pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "workflows".to_string(),
            sql: r#"
                CREATE TABLE IF NOT EXISTS workflows (
                    workflow_id TEXT PRIMARY KEY,
                    task_json TEXT NOT NULL,
                    repos_json TEXT NOT NULL,
                    engine TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    status TEXT NOT NULL,
                    successful_repos_json TEXT NOT NULL,
                    failed_repos_json TEXT NOT NULL,
                    execution_time_seconds REAL
                );
                CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
                CREATE INDEX IF NOT EXISTS idx_workflows_created_at ON workflows(created_at DESC);
            "#.to_string(),
        },
        Migration {
            version: 2,
            description: "dlq_entries".to_string(),
            sql: r#"
                CREATE TABLE IF NOT EXISTS dlq_entries (
                    id TEXT PRIMARY KEY,
                    workflow_id TEXT NOT NULL,
                    task_json TEXT NOT NULL,
                    repos_json TEXT NOT NULL,
                    engine TEXT NOT NULL,
                    error TEXT NOT NULL,
                    error_kind TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    metadata_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_dlq_timestamp ON dlq_entries(timestamp DESC);
                CREATE INDEX IF NOT EXISTS idx_dlq_workflow_id ON dlq_entries(workflow_id);
            "#.to_string(),
        },
        Migration {
            version: 3,
            description: "sagas and idempotency records".to_string(),
            sql: r#"
                CREATE TABLE IF NOT EXISTS sagas (
                    saga_id TEXT PRIMARY KEY,
                    saga_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    current_step_index INTEGER NOT NULL,
                    completed_steps_json TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    retry_count INTEGER NOT NULL,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_sagas_status ON sagas(status);

                CREATE TABLE IF NOT EXISTS idempotency_records (
                    saga_id TEXT NOT NULL,
                    step_name TEXT NOT NULL,
                    idempotency_key TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    executed_at TEXT NOT NULL,
                    PRIMARY KEY (saga_id, step_name, idempotency_key, namespace)
                );
            "#.to_string(),
        },
    ]
}
