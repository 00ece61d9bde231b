//! Application services for the Mahavishnu orchestrator.
//!
//! One module per subsystem from the system overview: input validation, the
//! resilience layer (circuit breaker, retry executor, dead-letter queue,
//! resilient adapter decorator, event bus), the execution engine, the saga
//! coordinator, and the worker pool manager.

pub mod circuit_breaker;
pub mod dead_letter_queue;
pub mod event_bus;
pub mod execution_engine;
pub mod resilient_adapter;
pub mod retry_executor;
pub mod saga_coordinator;
pub mod validators;
pub mod worker_pool_manager;

pub use circuit_breaker::{target_key, CircuitBreakerRegistry, CircuitDecision};
pub use dead_letter_queue::{DeadLetterQueue, WorkflowReplayer};
pub use event_bus::{kind as event_kind, EventBus};
pub use execution_engine::{EngineReplayer, ExecutionEngine, ExecutionEngineConfig};
pub use resilient_adapter::ResilientAdapter;
pub use retry_executor::{execute_with_retry, RetryConfig};
pub use saga_coordinator::{SagaCoordinator, SagaCoordinatorConfig, SagaStep};
pub use validators::{to_absolute, validate_identifier, validate_no_embedded_secret, validate_repo_path};
pub use worker_pool_manager::{ChildProcessLauncher, WorkerPoolManager, WorkerProcessLauncher};
