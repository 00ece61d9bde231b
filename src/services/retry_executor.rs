//! Retry Executor: exponential backoff with jitter over classified failures
//! (§4.2, §8 property 4).
//!
//! Holds no state of its own (§3 "the Retry Executor holds no state"); it is
//! a pure function of its config plus the callable it is given.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::domain::error::MahavishnuError;

/// Tunables for one retry attempt sequence. Defaults mirror §4.2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for the exponential backoff sequence.
    pub base_delay: Duration,
    /// Ceiling applied to the computed delay before jitter.
    pub max_delay: Duration,
    /// Whether to add `U(0,1)` seconds of jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// The delay before attempt `i` (0-indexed), before it is actually
    /// invoked: `min(base * 2^i, max_delay) + jitter`. Exposed standalone so
    /// property tests can check the bound without running real sleeps.
    #[must_use]
    pub fn delay_for_attempt(&self, i: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(i as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter {
            capped + rand::thread_rng().gen_range(0.0..1.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Run `operation` under `config`, retrying on [`MahavishnuError::is_transient`]
/// failures and giving up immediately on any other kind (§4.2 algorithm).
///
/// `operation` is re-invoked from scratch on each attempt; closures that need
/// to share setup across attempts should capture it by reference.
///
/// # Errors
///
/// Returns the last error observed: immediately for a non-retryable kind, or
/// after `max_attempts` attempts are exhausted for a retryable one.
pub async fn execute_with_retry<F, Fut, T>(config: RetryConfig, mut operation: F) -> Result<T, MahavishnuError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, MahavishnuError>>,
{
    let attempts = config.max_attempts.max(1);
    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => {
                debug!(attempt, error = %err, "retry executor: non-retryable failure, surfacing immediately");
                return Err(err);
            }
            Err(err) if attempt + 1 == attempts => {
                warn!(attempt, error = %err, "retry executor: attempts exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(attempt, error = %err, delay_secs = delay.as_secs_f64(), "retry executor: retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("loop always returns on the last attempt")
}
