//! Internal lifecycle event model (§6 "Events (internal bus)").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One lifecycle event, published at-least-once to subscribed collectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The event's type tag, e.g. `"workflow.partial"` or `"breaker.opened"`.
    pub kind: String,
    /// The primary-key id most relevant to the event (workflow/pool/saga/…).
    pub subject_id: String,
    /// Arbitrary structured detail (repo path, error kind, worker id, ...).
    pub detail: serde_json::Value,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, subject_id: impl Into<String>, detail: serde_json::Value) -> Self {
        Self { kind: kind.into(), subject_id: subject_id.into(), detail, timestamp: Utc::now() }
    }

    /// Convenience constructor keying the event by a UUID subject.
    #[must_use]
    pub fn for_id(kind: impl Into<String>, subject_id: Uuid, detail: serde_json::Value) -> Self {
        Self::new(kind, subject_id.to_string(), detail)
    }
}
