use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry and backoff behavior on retryable run failures.
///
/// The counts and curve here are configurable defaults, not a fixed contract;
/// tune them per definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt. A job therefore
    /// gets at most `max_retries + 1` invocations before failing.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_backoff_ms: 300_000, // 5 minutes
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Policy with the given retry bound and default backoff curve.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Computes the backoff delay before a retry using exponential backoff.
///
/// Formula: delay = min(base_delay * 2^(failed_attempts-1), max_backoff)
pub fn compute_retry_delay(failed_attempts: u32, policy: &RetryPolicy) -> Duration {
    if failed_attempts == 0 {
        return Duration::from_millis(0);
    }

    let exp = failed_attempts.saturating_sub(1).min(63);
    let scaled = (policy.base_delay_ms as f64) * 2f64.powi(exp as i32);
    let capped = scaled.min(policy.max_backoff_ms as f64).max(0.0);

    Duration::from_millis(capped as u64)
}

/// Result of consulting the policy after a failed attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetryOutcome {
    /// Retry after the given backoff delay.
    Retry {
        /// Delay in milliseconds before the next attempt.
        delay_ms: u64,
    },
    /// Retries exhausted; the instance transitions to `failed`.
    Exhausted,
}

/// Consult the policy after `failed_attempts` failures of the current work
/// item.
///
/// - If `failed_attempts <= max_retries`: compute backoff and retry.
/// - Otherwise: exhausted.
pub fn next_attempt_outcome(failed_attempts: u32, policy: &RetryPolicy) -> RetryOutcome {
    if failed_attempts > policy.max_retries {
        RetryOutcome::Exhausted
    } else {
        let delay = compute_retry_delay(failed_attempts, policy);
        RetryOutcome::Retry {
            delay_ms: delay.as_millis() as u64,
        }
    }
}
