use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Reasons the retry loop stops without surfacing an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetryHalt {
    #[error("operation cancelled")]
    Cancelled,
    #[error("max retry attempts ({0}) reached")]
    Exhausted(u32),
}

/// Exponential backoff configuration with proportional jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra wait, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    /// Backoff before the retry that follows `attempt` (0-indexed), without jitter.
    ///
    /// Formula: `min(base_delay * 2^attempt, max_delay)`
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus up to `jitter_ratio` of it on top. Jitter never shortens the wait.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for_attempt(attempt);
        if self.jitter_ratio <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        backoff + backoff.mul_f64(jitter)
    }
}

/// Retry an async operation with exponential backoff, jitter and cancellation.
///
/// - `config`: retry configuration
/// - `token`: ambient cancellation; checked before every attempt and raced
///   against every backoff sleep
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, the last attempt's error verbatim, the
/// error the classifier aborted on, or a [`RetryHalt`] converted into `E`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    token: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display + From<RetryHalt>,
{
    let total_attempts = config.max_attempts;

    for attempt in 0..total_attempts {
        if token.is_cancelled() {
            return Err(RetryHalt::Cancelled.into());
        }
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort {
                    return Err(e);
                }
                if attempt + 1 >= total_attempts {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {:.1}s: {}",
                    attempt + 1,
                    total_attempts,
                    delay.as_secs_f64(),
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {
                        tracing::debug!("Cancelled during retry backoff");
                        return Err(RetryHalt::Cancelled.into());
                    }
                }
            }
        }
    }

    Err(RetryHalt::Exhausted(total_attempts).into())
}
