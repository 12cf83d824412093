use crate::core::error::RateError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(u64),
    Exponential(u64),
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Fixed(ms) => Duration::from_millis(ms),
            Backoff::Exponential(base_ms) => {
                let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }

    /// Largest random extra delay added on top of [`Backoff::delay_for`].
    /// Fixed delays are not jittered.
    pub fn max_jitter(&self) -> Duration {
        match *self {
            Backoff::Fixed(_) => Duration::ZERO,
            Backoff::Exponential(base_ms) => Duration::from_millis(base_ms.min(1000)),
        }
    }

    /// Delay after the given attempt with jitter applied, so concurrent
    /// retries do not hit the upstream in lockstep.
    pub fn jittered_delay_for(&self, attempt: usize) -> Duration {
        let max_jitter = u64::try_from(self.max_jitter().as_millis()).unwrap_or(0);
        let jitter = if max_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter)
        };
        self.delay_for(attempt) + Duration::from_millis(jitter)
    }
}

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `backoff`: Delay policy between attempts
///
/// Errors that are not retryable (see [`RateError::is_retryable`]) are
/// returned immediately.
pub async fn with_retry<F, Fut, T, E>(
    mut operation: F,
    retries: usize,
    backoff: Backoff,
) -> Result<T, RateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<RateError>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(Into::into) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries || !err.is_retryable() {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                tokio::time::sleep(backoff.jittered_delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}
