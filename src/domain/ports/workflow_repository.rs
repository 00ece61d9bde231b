//! Workflow state store port (§4 "Workflow State Store", §6 persistent state layout).

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{Workflow, WorkflowStatus};

/// Optional filter for [`WorkflowRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    /// Restrict to workflows with this status.
    pub status: Option<WorkflowStatus>,
    /// Restrict to workflows against this engine.
    pub engine: Option<String>,
}

/// Durable record of in-flight and terminal workflows.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new workflow row.
    async fn create(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Overwrite an existing workflow row with its current in-memory state.
    async fn update(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Fetch one workflow by id, if it exists.
    async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StoreError>;

    /// List workflows, optionally filtered, newest-created first.
    async fn list(&self, filter: Option<WorkflowFilter>) -> Result<Vec<Workflow>, StoreError>;
}
