//! Reusable retry policy with exponential backoff.
//!
//! Collaborator calls (recognition today, potentially others) share one
//! policy shape instead of scattering ad hoc retry loops per call site.

use crate::defaults;
use std::time::Duration;

/// Retry policy: a fixed attempt budget with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::RECOGNITION_MAX_RETRIES,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given retry budget and backoff bounds.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Total attempts including the initial one.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff delay before retrying after failed attempt `attempt`
    /// (0-based). Doubles per attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        let factor = 1u64 << shift;
        let delay = self.base_delay.saturating_mul(factor.min(u32::MAX as u64) as u32);
        delay.min(self.max_delay)
    }
}
