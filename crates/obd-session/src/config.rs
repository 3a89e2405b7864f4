//! Session configuration

use obd_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::ConnectionSession`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response timeout for discovery and trouble code services in milliseconds
    pub exchange_timeout_ms: u64,
    /// Polling configuration
    pub scheduler: SchedulerConfig,
    /// Events buffered per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
    /// Operations queued while the session task is busy
    pub request_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 2000,
            scheduler: SchedulerConfig::default(),
            event_capacity: 256,
            request_capacity: 32,
        }
    }
}

impl SessionConfig {
    /// Timeout for a single discovery or service exchange
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}
