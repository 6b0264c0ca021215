//! Agent configuration management
//!
//! Configuration is layered, highest priority first:
//! - the `--address` command line flag
//! - the `SCRATCHLINK_ADDRESS` environment variable
//! - the file given with `--config`, else `<config dir>/scratchlink/config.toml` when present
//! - defaults

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use scratchlink_ble::BleConfig;
use scratchlink_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding `server.address`
pub const ADDRESS_ENV: &str = "SCRATCHLINK_ADDRESS";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket listener
    pub server: ServerConfig,
    /// Limits applied to every client session
    pub session: SessionConfig,
    /// BLE adapter selection
    pub ble: BleConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// WebSocket listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub address: String,
    /// Request path that is upgraded to a WebSocket
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:20110".to_string(),
            path: "/scratch/ble".to_string(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log at debug level unless `RUST_LOG` says otherwise
    pub verbose: bool,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from `path`, else from the default location when it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path().filter(|p| p.exists()) {
                Some(default_path) => Self::load_from_file(default_path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::Loading(reason) => {
                ConfigError::Loading(format!("{}: {}", path.as_ref().display(), reason))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Loading(e.to_string()))
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scratchlink").join("config.toml"))
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ADDRESS_ENV).filter(|a| !a.trim().is_empty()) {
            self.server.address = address.trim().to_string();
        }
    }

    /// Parsed listen address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.address.parse().map_err(|e| {
            ConfigError::Validation(format!(
                "Invalid server address {:?}: {}",
                self.server.address, e
            ))
        })
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Server path must start with '/', got {:?}",
                self.server.path
            )));
        }

        self.session
            .validate()
            .map_err(|e| ConfigError::Validation(format!("session: {}", e)))?;
        self.ble
            .validate()
            .map_err(|e| ConfigError::Validation(format!("ble: {}", e)))?;

        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let body = toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| "# Failed to generate example config\n".to_string());

        format!(
            "# scratchlink configuration\n\
             #\n\
             # Save as {} or pass with --config.\n\
             # {} overrides server.address; RUST_LOG overrides logging.verbose.\n\
             # session.device_timeout_secs = 0 disables the device operation bound.\n\n{}",
            Self::default_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string()),
            ADDRESS_ENV,
            body
        )
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
