//! Domain layer for the Mahavishnu orchestrator.
//!
//! Contains core business entities (task, workflow, circuit, pool, saga) and
//! the ports (traits) that infrastructure adapters implement. Nothing in this
//! module depends on sqlx, tokio::process, or any other infrastructure crate.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{MahavishnuError, ProcessError, StoreError};
