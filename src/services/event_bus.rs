//! Internal lifecycle event bus (§6 "Events (internal bus)").
//!
//! A thin wrapper over [`tokio::sync::broadcast`]: publishing never blocks on
//! subscribers, and a slow or absent collector cannot back-pressure the
//! core. Delivery is at-least-once — a subscriber that falls behind the
//! channel's capacity observes [`broadcast::error::RecvError::Lagged`] and
//! resumes from the next event, rather than stalling the publisher.

use tokio::sync::broadcast;

use crate::domain::models::Event;

/// The event kinds named in §6, as stable string tags so callers and tests
/// don't have to match on an enum that would otherwise have to track every
/// component's lifecycle vocabulary.
pub mod kind {
    pub const WORKFLOW_CREATED: &str = "workflow.created";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_SUCCEEDED: &str = "workflow.succeeded";
    pub const WORKFLOW_PARTIAL: &str = "workflow.partial";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";
    pub const REPO_SUCCEEDED: &str = "repo.succeeded";
    pub const REPO_FAILED: &str = "repo.failed";
    pub const DLQ_ENQUEUED: &str = "dlq.enqueued";
    pub const DLQ_REPLAYED: &str = "dlq.replayed";
    pub const BREAKER_OPENED: &str = "breaker.opened";
    pub const BREAKER_CLOSED: &str = "breaker.closed";
    pub const BREAKER_HALF_OPEN: &str = "breaker.half_open";
    pub const POOL_CREATED: &str = "pool.created";
    pub const POOL_DEGRADED: &str = "pool.degraded";
    pub const POOL_DESTROYED: &str = "pool.destroyed";
    pub const WORKER_SPAWNED: &str = "worker.spawned";
    pub const WORKER_READY: &str = "worker.ready";
    pub const WORKER_UNHEALTHY: &str = "worker.unhealthy";
    pub const WORKER_DEAD: &str = "worker.dead";
    pub const SAGA_CREATED: &str = "saga.created";
    pub const SAGA_STEP_SUCCEEDED: &str = "saga.step.succeeded";
    pub const SAGA_STEP_FAILED: &str = "saga.step.failed";
    pub const SAGA_COMPENSATING: &str = "saga.compensating";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_FAILED: &str = "saga.failed";
}

/// Process-wide publisher/subscriber handle for lifecycle events. Cheap to
/// clone; every clone publishes onto the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with a channel capacity of `capacity` events. Publishers
    /// that outrun every subscriber by more than `capacity` events cause the
    /// slowest subscriber to lag rather than the publisher to block.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to all current subscribers. A publish with zero
    /// subscribers is a no-op, not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events. Events published before this call are
    /// not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Current number of live subscribers, mostly useful for tests and
    /// diagnostics.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(kind::WORKFLOW_CREATED, "wf-1", serde_json::json!({})));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, kind::WORKFLOW_CREATED);
        assert_eq!(event.subject_id, "wf-1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        bus.publish(Event::new(kind::WORKFLOW_STARTED, "wf-1", serde_json::json!({})));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(Event::new(kind::BREAKER_OPENED, "mock:/r/a", serde_json::json!({})));
        assert_eq!(rx1.recv().await.unwrap().kind, kind::BREAKER_OPENED);
        assert_eq!(rx2.recv().await.unwrap().kind, kind::BREAKER_OPENED);
    }

    #[tokio::test]
    async fn a_lagging_subscriber_observes_lagged_rather_than_blocking_the_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(Event::new(kind::REPO_SUCCEEDED, format!("r{i}"), serde_json::json!({})));
        }
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
