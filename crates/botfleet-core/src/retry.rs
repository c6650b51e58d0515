//! Retry handling for failed profile runs.
//!
//! Classification is substring-based and case-insensitive: an error is
//! retryable when its message contains any of the policy's patterns. The
//! default pattern list covers transient network and browser-session
//! failures. Delay grows per the policy's backoff strategy, capped, then
//! spread by +/-20% jitter so parallel slots do not retry in lockstep.

use std::future::Future;
use std::time::Duration;

use botfleet_types::retry::{BackoffStrategy, RetryPolicy};
use rand::Rng;

// ---------------------------------------------------------------------------
// RetryManager
// ---------------------------------------------------------------------------

/// Applies a [`RetryPolicy`]: classify errors, compute delays, drive the
/// retry loop.
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether an error message looks transient per the policy's patterns.
    pub fn is_retryable(&self, error: &str) -> bool {
        let error = error.to_lowercase();
        self.policy
            .retryable_patterns
            .iter()
            .any(|pattern| error.contains(&pattern.to_lowercase()))
    }

    /// Whether another retry may be attempted after `retries_used` retries
    /// have already run for this error.
    pub fn should_retry(&self, retries_used: u32, error: &str) -> bool {
        retries_used < self.policy.max_retries && self.is_retryable(error)
    }

    /// Delay before the next retry, given how many retries have already
    /// run: fixed `base`, linear `base*(n+1)`, exponential `base*2^n`.
    ///
    /// The strategy value is capped at `max_delay_ms` before jitter, so
    /// jitter can push the final delay slightly past the cap.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base = self.policy.base_delay_ms;
        let raw = match self.policy.strategy {
            BackoffStrategy::None => 0,
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(retry_count as u64 + 1),
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64.checked_shl(retry_count).unwrap_or(u64::MAX))
            }
        };
        let capped = raw.min(self.policy.max_delay_ms);

        let final_ms = if self.policy.jitter && capped > 0 {
            let spread = (capped as f64 * 0.2).max(1.0);
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped as f64 + offset).max(0.0) as u64
        } else {
            capped
        };
        Duration::from_millis(final_ms)
    }

    /// Run an operation with retries.
    ///
    /// `op` is re-invoked after each retryable failure until it succeeds,
    /// the error classifies as permanent, or the retry budget is spent.
    /// Returns the last error when retries are exhausted.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries_used = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let message = e.to_string();
                    if !self.should_retry(retries_used, &message) {
                        if retries_used > 0 {
                            tracing::warn!(
                                label,
                                retries_used,
                                error = message.as_str(),
                                "retries exhausted"
                            );
                        }
                        return Err(e);
                    }
                    let delay = self.delay(retries_used);
                    retries_used += 1;
                    tracing::info!(
                        label,
                        retry = retries_used,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = message.as_str(),
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
