use std::future::Future;
use std::time::Duration;

use crate::Result;

/// Bounded retry with exponential backoff. Only errors whose
/// [`AtelierError::retryable`] flag is set are re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retry. Used by providers that manage their own
    /// waiting (Replicate polling) or that the upstream treats as
    /// single-shot (Gemini, Stability).
    pub const fn single() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Two total attempts, 1s base backoff doubling up to 8s.
    pub const fn standard() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    fn backoff_delay(&self, completed_attempts: u32) -> Duration {
        let factor = 1u32 << completed_attempts.min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < max_attempts && err.retryable() => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying provider call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
