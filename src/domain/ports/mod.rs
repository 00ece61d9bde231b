//! Domain ports (interfaces) for the Mahavishnu orchestrator.
//!
//! Everything the core needs from infrastructure is expressed as a trait
//! here; `adapters::sqlite` and `adapters::mock_engine` provide the concrete
//! implementations.

pub mod adapter;
pub mod dlq_repository;
pub mod saga_repository;
pub mod workflow_repository;

pub use adapter::{AdapterResult, AdapterStatus, EngineAdapter, HealthState, HealthStatus};
pub use dlq_repository::DlqRepository;
pub use saga_repository::SagaRepository;
pub use workflow_repository::{WorkflowFilter, WorkflowRepository};
