// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Producers that get `QueueFull` back may retry with backoff. A rejection
//! from an open circuit is not transient in that sense and should not be
//! retried immediately, so retries are gated by a predicate.
//!
//! # Example
//!
//! ```
//! use bridge_router::RetryConfig;
//!
//! // Interactive producer: a few quick attempts
//! let quick = RetryConfig::quick();
//! assert_eq!(quick.max_retries, 3);
//!
//! // Batch producer: waits longer between attempts
//! let patient = RetryConfig::patient();
//! assert!(patient.max_delay > quick.max_delay);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Attempts after the first one
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::quick()
    }
}

impl RetryConfig {
    /// 3 retries with fast backoff, for producers on a latency budget.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            factor: 2.0,
        }
    }

    /// 10 retries capped at 5 seconds, for background producers.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before retry number `attempt` (1-based). Never exceeds
    /// `max_delay`; a `factor` below 1 or NaN is treated as 1.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.factor.max(1.0);
        let scaled = self.initial_delay.as_secs_f64() * factor.powi(exp);
        Duration::try_from_secs_f64(scaled).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Run `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or the retry budget runs out. `min_delay` lets the error raise
/// the backoff (for example from a pressure hint).
pub async fn retry_if<F, Fut, T, E, P, D>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
    min_delay: D,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    D: Fn(&E) -> Duration,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                if !is_transient(&err) {
                    debug!(operation = operation_name, error = %err, "Non-transient failure, not retrying");
                    return Err(err);
                }
                if attempts >= config.max_retries {
                    warn!(operation = operation_name, attempts = attempts + 1, error = %err, "Retry budget exhausted");
                    return Err(err);
                }
                attempts += 1;
                crate::metrics::record_retry(operation_name);
                let delay = config.delay_for(attempts).max(min_delay(&err));
                debug!(
                    operation = operation_name,
                    attempt = attempts,
                    max = config.max_retries,
                    error = %err,
                    ?delay,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
