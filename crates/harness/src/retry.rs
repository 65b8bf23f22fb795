//! Retry and deadline combinators.
//!
//! Session acquisition layers a fixed-delay retry policy under a wall-clock
//! deadline; both pieces are plain combinators over async closures so they
//! can be tested without any driver in the loop. First bound to trip wins:
//! the deadline fires even when retry budget remains.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{HarnessError, Result};

/// Fixed-attempt, fixed-delay retry policy.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `op` until it succeeds or attempts are exhausted, sleeping
    /// between attempts. The closure receives the 1-based attempt number;
    /// the last error is returned when the budget runs out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(
                        target = "gauntlet.retry",
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last_err = Some(err);
                }
            }
            if attempt < self.max_attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        // max_attempts >= 1, so at least one error was recorded
        Err(last_err.unwrap_or_else(|| {
            HarnessError::SessionCreation("retry loop ran zero attempts".to_string())
        }))
    }
}

/// Races `fut` against a wall-clock deadline, mapping expiry to
/// [`HarnessError::Timeout`]. On expiry the in-flight result is discarded.
pub async fn deadline<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::Timeout {
            ms: limit.as_millis() as u64,
            operation: operation.to_string(),
        }),
    }
}
