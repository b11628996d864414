//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a sync session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ensemble the store belongs to; the top-level folder in the cloud.
    pub ensemble_id: String,
    /// Retries of a retryable failure before a scheduled run gives up.
    pub max_retries: u32,
    /// First retry delay (in milliseconds); doubles on every retry.
    pub retry_base_delay_ms: u64,
    /// Upper bound for the retry delay (in milliseconds).
    pub retry_max_delay_ms: u64,
    /// Change sets downloaded at once during a merge.
    pub download_concurrency: usize,
    /// Publish merge progress to the device registration after each merge.
    pub publish_progress: bool,
    /// Change sets a rebase must be able to fold before it writes a new baseline.
    pub rebase_min_change_sets: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ensemble_id: "default".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            download_concurrency: 8,
            publish_progress: true,
            rebase_min_change_sets: 100,
            event_capacity: 100,
        }
    }
}

impl SyncConfig {
    pub fn new(ensemble_id: impl Into<String>) -> Self {
        Self {
            ensemble_id: ensemble_id.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn ensemble_id(mut self, id: impl Into<String>) -> Self {
        self.config.ensemble_id = id.into();
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.config.retry_base_delay_ms = base_ms;
        self.config.retry_max_delay_ms = max_ms;
        self
    }

    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.config.download_concurrency = concurrency.max(1);
        self
    }

    pub fn publish_progress(mut self, enabled: bool) -> Self {
        self.config.publish_progress = enabled;
        self
    }

    pub fn rebase_min_change_sets(mut self, count: usize) -> Self {
        self.config.rebase_min_change_sets = count;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
