//! Throttled retry with exponential backoff
//!
//! Every attempt is preceded by `throttle`. After `n` failures the next
//! attempt additionally waits `base_wait * 2^n`, so the waits before
//! attempts 1, 2, 3 are `throttle`, `throttle + 2 * base`,
//! `throttle + 4 * base`, ... After `max_attempts` failures the last error
//! is wrapped in [`EnrichError::RetriesExhausted`].

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{EnrichError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub throttle: Duration,
    pub base_wait: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(throttle: Duration, base_wait: Duration, max_attempts: u32) -> Self {
        Self {
            throttle,
            base_wait,
            max_attempts,
        }
    }

    /// Wait before the given 1-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let failures = attempt.saturating_sub(1);
        if failures == 0 {
            return self.throttle;
        }
        let factor = 2u32.saturating_pow(failures);
        self.throttle + self.base_wait.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` attempts have failed. `op` receives the attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tokio::time::sleep(self.delay_before(attempt)).await;

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(stage = label, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(stage = label, attempt, error = %e, "Request failed");

                    if attempt >= self.max_attempts {
                        return Err(EnrichError::RetriesExhausted {
                            stage: label.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}
