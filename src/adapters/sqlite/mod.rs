//! SQLite adapters for the Mahavishnu orchestrator's durable state.
//!
//! `connection` and `migrations` are infrastructure-only (no domain types).
//! `workflow_repository`, `dlq_repository`, and `saga_repository` implement
//! the ports declared under `domain::ports`.

pub mod connection;
pub mod dlq_repository;
pub mod migrations;
pub mod saga_repository;
pub mod workflow_repository;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use dlq_repository::SqliteDlqRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use saga_repository::SqliteSagaRepository;
pub use workflow_repository::SqliteWorkflowRepository;

use sqlx::SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open (or create) the database at `database_url` and bring it up to the
/// latest schema version.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, None).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

pub async fn initialize_default_database() -> Result<SqlitePool, DatabaseError> {
    initialize_database("sqlite:.mahavishnu/mahavishnu.db").await
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
