//! Retry with exponential backoff
//!
//! One policy governs every request the poller makes.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the failure is transient and attempts remain: log WARN, back off,
//!    retry the same request
//! 4. If transient and no attempts remain: give up with the last error
//! 5. Any other failure returns immediately (no retry)
//!
//! The backoff sleep is raced against the cancellation token, so a cancel
//! never waits out a delay.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Why [`RetryPolicy::run`] gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// Non-transient error, returned on first sight
    Permanent(FetchError),
    /// Every attempt failed transiently
    Exhausted { attempts: u32, last: FetchError },
}

impl RetryPolicy {
    /// Delay after the `failed_attempts`-th consecutive failure
    ///
    /// `base_delay * 2^(failed_attempts - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` under this policy
    ///
    /// Returns `Ok(None)` if `cancel` fires during a backoff.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<Option<T>, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(Some(value));
                }
                Err(err) if !err.is_transient() => return Err(RetryFailure::Permanent(err)),
                Err(err) if attempt >= max_attempts => {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Request failed: retries exhausted"
                    );
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let backoff = self.delay_after(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}
