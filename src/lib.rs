//! Mahavishnu - a multi-repository workflow orchestrator.
//!
//! Executes named tasks across a fleet of git repositories through
//! interchangeable execution engines, with bounded concurrency, a
//! resilience layer (retry, circuit breaking, dead-letter queue), a
//! worker pool manager, and a saga coordinator for crash-recoverable
//! multi-step workflow creation.
//!
//! This crate is the core plus its ambient stack (config loading, logging
//! setup, sqlite persistence). The CLI, MCP server, HTTP endpoints, and
//! concrete engine adapters beyond the in-tree mock are wrappers an
//! embedding application builds around this library.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;
