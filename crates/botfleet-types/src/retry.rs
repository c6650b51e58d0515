//! Retry policy types: backoff shape, jitter, and retryable-error patterns.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BackoffStrategy
// ---------------------------------------------------------------------------

/// The backoff shape used to schedule a re-attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Never retry.
    None,
    /// Constant delay equal to the base delay.
    Fixed,
    /// Delay grows linearly: `base * (retry_count + 1)`.
    Linear,
    /// Delay doubles each attempt: `base * 2^retry_count`.
    #[default]
    Exponential,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Configuration for transient-failure retry.
///
/// Classification is by case-insensitive substring match against
/// `retryable_patterns`. Error messages carry no structured codes, so the
/// match is deliberately heuristic and the list stays configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff shape.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper cap on any computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Apply +/-20% random jitter to the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Error-message substrings considered transient.
    #[serde(default = "default_retryable_patterns")]
    pub retryable_patterns: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> bool {
    true
}

fn default_retryable_patterns() -> Vec<String> {
    [
        "timeout",
        "timed out",
        "econnreset",
        "econnrefused",
        "net::err",
        "navigation timeout",
        "target closed",
        "session closed",
        "connection closed",
        "socket hang up",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            retryable_patterns: default_retryable_patterns(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
