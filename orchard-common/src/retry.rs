//! Bounded retry with exponential backoff and jitter
//!
//! Used for transient external failures (platform API 5xx, rate limits,
//! database lock contention). Each attempt runs under its own timeout;
//! non-retryable errors surface immediately.

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Exponential growth factor per attempt
    pub multiplier: f64,
    /// Upper bound on a single backoff sleep
    pub max_delay: Duration,
    /// Fraction of the delay randomized in both directions (0.2 = ±20%)
    pub jitter_fraction: f64,
    /// Per-attempt timeout
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter_fraction: 0.2,
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Policy used for platform metrics collection (5 attempts, 30s per try).
    pub fn metrics_collection(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Compute the backoff delay for a given zero-based attempt, with jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let jitter = capped * self.jitter_fraction * (2.0 * rand::thread_rng().gen::<f64>() - 1.0);
        Duration::from_millis((capped + jitter).max(0.0).round() as u64)
    }
}

/// Run `operation` until it succeeds, a non-retryable error occurs, or the
/// attempt budget is exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        let result = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(policy.attempt_timeout.as_millis() as u64)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt + 1 == policy.max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = policy.max_attempts,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(Error::Internal(format!(
        "retry loop for {operation_name} exited without a result"
    )))
}
