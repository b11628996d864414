//! Retry delays for scheduled runs.

use crate::config::SyncConfig;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn with_backoff(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::with_backoff(
            config.retry_base_delay(),
            config.retry_max_delay(),
            config.max_retries,
        )
    }

    /// Delay before retry number `retry` (counting from 0).
    pub fn backoff(&self, retry: u32) -> Duration {
        // base * 2^retry, capped at max
        let multiplier = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(multiplier);
        std::cmp::min(backoff, self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
