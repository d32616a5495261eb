//! Reconnection backoff policy
//!
//! Delay doubles from `base` per consecutive failure and is capped at `max`.
//! After `max_retries` consecutive failures reconnection stops.

use std::time::Duration;

/// Default first delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default delay ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default number of consecutive reconnection attempts
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Exponential backoff with a ceiling and a retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following `retry` consecutive failures:
    /// `min(base * 2^retry, max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Whether `retry` consecutive failures exhaust the budget.
    pub fn exhausted(&self, retry: u32) -> bool {
        retry >= self.max_retries
    }
}
