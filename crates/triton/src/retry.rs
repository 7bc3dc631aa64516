//! Exponential backoff for transient backend failures.
//!
//! Applies to single-record and batch writes.  Only HTTP-500-class
//! failures and the throughput-exceeded signal are retried; all other
//! errors propagate immediately.

use std::time::Duration;

use tracing::warn;

use crate::errors::BackendError;

/// Default ceiling on re-attempts after the first call.
pub const MAX_RETRY_COUNT: u32 = 2;

/// Backoff base: `delay(n) = 2^n × 100ms`.
pub const BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: MAX_RETRY_COUNT,
            base: BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt)
    }

    /// Drive `op` until it succeeds, fails fatally, or exhausts the
    /// retry budget.  The last error re-raises.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    warn!(error = %e, attempt, ?delay, "transient backend failure; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
