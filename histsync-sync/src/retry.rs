//! Retry-with-backoff policy for network operations.

use crate::error::SyncResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) that fails transiently is followed by a sleep of
/// `base_delay * 2^(n-1)`, capped at `max_delay`. Non-transient errors are
/// returned immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// The outcome of a retried operation and how many retries it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: SyncResult<T>,
    pub retries: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    return Attempted {
                        result,
                        retries: attempt - 1,
                    };
                }
            }
        }
    }
}
