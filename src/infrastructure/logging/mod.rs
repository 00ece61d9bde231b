//! Logging infrastructure.
//!
//! Structured logging on top of `tracing`: JSON/pretty formatting via
//! `tracing-subscriber`, non-blocking file output and rotation via
//! `tracing-appender`, a best-effort secret-scrubbing layer, and a standalone
//! retention-cleanup utility for rotated files. An embedding application
//! calls [`LoggerImpl::init`] once at startup; library code here only ever
//! emits events.

mod config;
mod logger;
mod rotation;
mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
pub use rotation::LogRotator;
pub use secret_scrubbing::SecretScrubbingLayer;

pub use tracing::{debug, error, info, instrument, trace, warn};
