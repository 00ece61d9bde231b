//! Domain models.
//!
//! Pure domain entities with business logic and validation rules. These
//! models are framework-agnostic and contain no infrastructure concerns.

pub mod circuit;
pub mod dlq;
pub mod event;
pub mod pool;
pub mod repo;
pub mod saga;
pub mod task;
pub mod workflow;

pub use circuit::{Circuit, CircuitBreakerConfig, CircuitState};
pub use dlq::{DlqEntry, DlqFilter};
pub use event::Event;
pub use pool::{PoolConfig, PoolStatus, Worker, WorkerPool, WorkerStatus};
pub use repo::RepoPath;
pub use saga::{IdempotencyRecord, Saga, SagaStatus};
pub use task::Task;
pub use workflow::{FailedRepo, Workflow, WorkflowStatus};
