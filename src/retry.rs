//! Retry with exponential backoff
//!
//! One helper shared by every storage write and every external API call.
//! Delays double per attempt without jitter: `base`, `2 * base`,
//! `4 * base`, ...

use backon::{ExponentialBuilder, Retryable as _};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How many times to retry and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that fails on the first error.
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }

    /// Backoff schedule for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        let ceiling = self.delay_for(self.max_retries.saturating_sub(1));
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(ceiling)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are exhausted. The last error is returned.
pub async fn with_backoff<T, E, F, Fut>(policy: RetryPolicy, operation: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    op.retry(policy.backoff())
        .when(|e: &E| e.is_retryable())
        .notify(|e: &E, delay: Duration| {
            warn!(
                operation,
                max_retries = policy.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %e,
                "Operation failed, retrying"
            );
        })
        .await
}
