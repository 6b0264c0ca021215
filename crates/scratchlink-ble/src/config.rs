//! BLE provider configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the btleplug provider
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Which system adapter to use (0 = first)
    pub adapter_index: usize,
    /// Maximum time to wait for a connection, in seconds
    pub connection_timeout_secs: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            connection_timeout_secs: 10,
        }
    }
}

impl BleConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the adapter
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs();
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Check the values for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.connection_timeout_secs == 0 {
            return Err("connection_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}
