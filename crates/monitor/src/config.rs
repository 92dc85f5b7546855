//! Engine tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and sizing parameters of the monitoring engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between poll cycles in milliseconds
    #[serde(default = "MonitorConfig::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Number of metadata database rebuilds before a lookup gives up
    #[serde(default = "MonitorConfig::default_retry_attempts")]
    pub metadata_retry_attempts: u32,
    /// Delay between metadata database rebuilds in milliseconds
    #[serde(default = "MonitorConfig::default_retry_delay")]
    pub metadata_retry_delay_ms: u64,
    /// Capacity of the update queue between poller and consumer
    #[serde(default = "MonitorConfig::default_queue_capacity")]
    pub update_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval(),
            metadata_retry_attempts: Self::default_retry_attempts(),
            metadata_retry_delay_ms: Self::default_retry_delay(),
            update_queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl MonitorConfig {
    fn default_poll_interval() -> u64 {
        250
    }

    fn default_retry_attempts() -> u32 {
        6
    }

    fn default_retry_delay() -> u64 {
        20
    }

    fn default_queue_capacity() -> usize {
        1
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_retry_delay_ms)
    }

    /// Reject values that would stall or spin the engine
    pub fn validate(&self) -> common::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(common::Error::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.metadata_retry_attempts == 0 {
            return Err(common::Error::Config(
                "metadata_retry_attempts must be greater than 0".to_string(),
            ));
        }
        if self.update_queue_capacity == 0 {
            return Err(common::Error::Config(
                "update_queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
