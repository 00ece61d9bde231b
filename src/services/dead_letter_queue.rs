//! Dead-Letter Queue service (§4.3, §8 round-trip laws).
//!
//! Thin business-logic layer over [`DlqRepository`]: `enqueue` stamps a
//! fresh [`DlqEntry`] and persists it (a hard error on persistence failure is
//! simply propagated, per §4.3); `replay` removes the record first and then
//! hands the recorded task back to whatever driver the caller supplies, so a
//! crash between removal and re-execution leaves the entry gone rather than
//! duplicated (§4.3's idempotence note: the underlying task itself must be
//! safe to run twice if a duplicate replay happens the other way around).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::MahavishnuError;
use crate::domain::models::{DlqEntry, DlqFilter, Event, RepoPath, Task};
use crate::domain::ports::DlqRepository;
use crate::services::event_bus::{kind, EventBus};

/// Re-drives a previously-failed task/repos/engine triple. Implemented by
/// the Execution Engine; kept as a trait here so the DLQ has no compile-time
/// dependency on the engine's concrete type.
#[async_trait]
pub trait WorkflowReplayer: Send + Sync {
    /// Re-submit `task` against `repos` through `engine`, exactly as if it
    /// were a fresh `execute_workflow` call.
    async fn replay(&self, task: Task, repos: Vec<RepoPath>, engine: String) -> Result<(), MahavishnuError>;
}

/// Durable, inspectable queue of failures that exceeded retries or hit an
/// open circuit.
pub struct DeadLetterQueue {
    repository: Arc<dyn DlqRepository>,
    events: EventBus,
}

impl DeadLetterQueue {
    /// Build a DLQ backed by `repository`. Publishes `dlq.enqueued` and
    /// `dlq.replayed` to `events` (§6).
    #[must_use]
    pub fn new(repository: Arc<dyn DlqRepository>, events: EventBus) -> Self {
        Self { repository, events }
    }

    /// Persist a new entry for a terminal per-repo failure. Returns the
    /// entry's id.
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::Internal`] if the underlying store fails
    /// to persist the entry — per §4.3 this is a hard error, never silently
    /// swallowed.
    pub async fn enqueue(
        &self,
        workflow_id: Uuid,
        task: Task,
        repos: Vec<RepoPath>,
        engine: impl Into<String>,
        error: &MahavishnuError,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Uuid, MahavishnuError> {
        let entry = DlqEntry::new(workflow_id, task, repos, engine, error.to_string(), error.kind_tag(), metadata);
        let id = entry.id;
        self.repository.enqueue(&entry).await?;
        tracing::info!(entry_id = %id, workflow_id = %workflow_id, "dlq: entry enqueued");
        self.events.publish(Event::for_id(kind::DLQ_ENQUEUED, id, serde_json::json!({ "workflow_id": workflow_id })));
        Ok(id)
    }

    /// Newest-first listing, optionally filtered.
    pub async fn list(&self, filter: Option<DlqFilter>) -> Result<Vec<DlqEntry>, MahavishnuError> {
        Ok(self.repository.list(filter).await?)
    }

    /// Fetch one entry by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, MahavishnuError> {
        Ok(self.repository.get(id).await?)
    }

    /// Remove the entry, then invoke `replayer` with its recorded task/repos/
    /// engine (§4.3 `replay`).
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::NotFound`] if `entry_id` does not exist.
    /// Propagates the replayer's error if re-execution itself fails; the
    /// entry is not re-inserted in that case (the caller owns recreating it
    /// if that is desired).
    pub async fn replay(&self, entry_id: Uuid, replayer: &dyn WorkflowReplayer) -> Result<(), MahavishnuError> {
        let entry = self
            .repository
            .get(entry_id)
            .await?
            .ok_or_else(|| MahavishnuError::NotFound(entry_id.to_string()))?;

        self.repository.remove(entry_id).await?;
        tracing::info!(entry_id = %entry_id, "dlq: entry removed ahead of replay");
        self.events.publish(Event::for_id(kind::DLQ_REPLAYED, entry_id, serde_json::json!({})));

        replayer.replay(entry.task, entry.repos, entry.engine).await
    }

    /// Count of entries currently stored.
    pub async fn size(&self) -> Result<usize, MahavishnuError> {
        Ok(self.repository.size().await?)
    }

    /// Delete all entries older than `before`.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<usize, MahavishnuError> {
        Ok(self.repository.purge(before).await?)
    }
}
