//! Dead-letter queue repository port (§4.3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{DlqEntry, DlqFilter};

/// Durable, inspectable storage for exhausted-retry failures.
#[async_trait]
pub trait DlqRepository: Send + Sync {
    /// Persist a new entry. Must be a hard error if persistence fails (§4.3).
    async fn enqueue(&self, entry: &DlqEntry) -> Result<(), StoreError>;

    /// Newest-first listing, optionally filtered.
    async fn list(&self, filter: Option<DlqFilter>) -> Result<Vec<DlqEntry>, StoreError>;

    /// Fetch one entry by id, if present.
    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, StoreError>;

    /// Remove an entry, e.g. after a successful replay.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;

    /// Count of entries currently stored.
    async fn size(&self) -> Result<usize, StoreError>;

    /// Delete all entries older than `before`.
    async fn purge(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}
