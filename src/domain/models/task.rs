//! Task domain model.
//!
//! A task is an opaque description consumed by an engine adapter: the core
//! never interprets `params`, only passes it through.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::MahavishnuError;

/// An opaque unit of work dispatched to an engine adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-supplied identifier, unique within the owning workflow.
    pub id: String,
    /// Engine-specific task type, e.g. `"sweep"`, `"dependency_audit"`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form parameters interpreted only by the adapter.
    pub params: HashMap<String, Value>,
}

impl Task {
    /// Construct a task, validating the required fields eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`MahavishnuError::Validation`] if `id` or `task_type` is
    /// empty.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        params: HashMap<String, Value>,
    ) -> Result<Self, MahavishnuError> {
        let id = id.into();
        let task_type = task_type.into();
        if id.trim().is_empty() {
            return Err(MahavishnuError::Validation("task id must not be empty".into()));
        }
        if task_type.trim().is_empty() {
            return Err(MahavishnuError::Validation("task type must not be empty".into()));
        }
        Ok(Self { id, task_type, params })
    }
}
