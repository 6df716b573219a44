//! Connection pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::TrackerAddress;

/// Largest pool a single tracker is given
pub const MAX_CAPACITY: usize = 4096;

/// Configuration for one tracker connection pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Tracker to connect to
    pub tracker: TrackerAddress,

    /// Maximum number of connections held at once
    pub capacity: usize,

    /// Idle connections older than this are probed, and the monitor
    /// wakes up at this cadence
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Default wait budget for `checkout`
    #[serde(with = "duration_secs")]
    pub checkout_timeout: Duration,

    /// Bound on a single TCP connect
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Bound on a single heartbeat probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Open `capacity` connections up front instead of on first use
    pub prefill: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerAddress::default(),
            capacity: 2,
            heartbeat_interval: Duration::from_secs(30 * 60),
            checkout_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            prefill: true,
        }
    }
}

impl PoolConfig {
    /// Default configuration pointed at the given tracker
    pub fn new(tracker: TrackerAddress) -> Self {
        Self {
            tracker,
            ..Self::default()
        }
    }

    /// Set the pool capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the default checkout wait budget
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Enable or disable eager connection at startup
    pub fn with_prefill(mut self, prefill: bool) -> Self {
        self.prefill = prefill;
        self
    }

    /// Reject values the pool cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "capacity {} exceeds the maximum of {}",
                self.capacity, MAX_CAPACITY
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be positive".into(),
            ));
        }
        if self.connect_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout and probe_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
