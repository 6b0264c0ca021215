//! Per-session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by every session of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest inbound frame accepted; a bigger frame closes the session
    pub max_frame_size: usize,
    /// Largest characteristic value a `read` may return
    pub max_value_size: usize,
    /// Capacity of the per-session outbound frame queue
    pub outbound_queue_size: usize,
    /// Bound on a single device operation, in seconds (0 = unbounded)
    pub device_timeout_secs: u64,
    /// Time a superseded scan task gets to return before it is aborted
    pub scan_stop_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_value_size: 512,
            outbound_queue_size: 100,
            device_timeout_secs: 30,
            scan_stop_grace_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound frame bound
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the characteristic value bound
    pub fn with_max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Set the outbound queue capacity
    pub fn with_outbound_queue_size(mut self, size: usize) -> Self {
        self.outbound_queue_size = size;
        self
    }

    /// Set the device operation bound (`None` disables it)
    pub fn with_device_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.device_timeout_secs = timeout.map(|t| t.as_secs().max(1)).unwrap_or(0);
        self
    }

    /// Set the grace period for superseded scans
    pub fn with_scan_stop_grace(mut self, grace: Duration) -> Self {
        self.scan_stop_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn device_timeout(&self) -> Option<Duration> {
        (self.device_timeout_secs > 0).then(|| Duration::from_secs(self.device_timeout_secs))
    }

    pub fn scan_stop_grace(&self) -> Duration {
        Duration::from_millis(self.scan_stop_grace_ms)
    }

    /// Check the values for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be greater than 0".to_string());
        }
        if self.max_value_size == 0 {
            return Err("max_value_size must be greater than 0".to_string());
        }
        if self.outbound_queue_size == 0 {
            return Err("outbound_queue_size must be greater than 0".to_string());
        }
        Ok(())
    }
}
