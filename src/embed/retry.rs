//! Bounded retry with linear backoff for provider calls.
//!
//! The delay before retry `n` is `base_delay × n`, doubled when the provider
//! signalled rate limiting. Sleeping goes through [`Sleeper`] so schedules can
//! be tested without a clock.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Delay unit multiplied by the attempt number (default: 1s).
    pub base_delay: Duration,
    /// Multiplier applied on rate-limit signals (default: 2).
    pub rate_limit_factor: u32,
    /// Upper bound for any single delay (default: 60s).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting, for tests and dry runs.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let mut delay = self.base_delay.saturating_mul(attempt);
        if rate_limited {
            delay = delay.saturating_mul(self.rate_limit_factor.max(2));
        }
        delay.min(self.max_delay)
    }
}

/// Source of waiting between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` until it succeeds, fails non-transiently, or retries run out.
///
/// A transient error that survives every retry is returned as
/// [`Error::Provider`] so callers see a single terminal failure kind.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt, err.is_rate_limited());
                warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                sleeper.sleep(delay).await;
            }
            Err(Error::TransientProvider {
                provider, message, ..
            }) => {
                return Err(Error::Provider {
                    provider,
                    message: format!("{message} (gave up after {attempt} retries)"),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
