//! Bounded exponential backoff for transient store errors.
//!
//! Only errors for which [`strata_core::Error::is_retryable`] returns true
//! are retried. The delay before attempt `n + 1` is `base * 2^(n - 1)`,
//! capped at `max_delay`. There is no jitter; retries are deterministic.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::metrics::record_retry;

/// Retry limits for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5_000),
        }
    }
}

/// Error from the final attempt, with the number of attempts made.
#[derive(Debug)]
pub struct Exhausted {
    /// Attempts made.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub error: strata_core::Error,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Returns the delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] carrying the last error and attempt count.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = strata_core::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transient store error, retrying"
                    );
                    record_retry(operation);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}
