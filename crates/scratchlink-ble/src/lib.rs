//! Bluetooth Low Energy capability provider for scratchlink
//!
//! Implements the `scratchlink-core` capability traits on top of `btleplug`,
//! so the protocol engine can drive real peripherals.
//!
//! ## Architecture
//!
//! - [`config`] - Adapter selection and connection timing
//! - [`address`] - Peripheral IDs reported to web clients
//! - `adapter` - Scanning and connection setup
//! - `peripheral` - Connected peripheral, services, characteristics and notification routing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scratchlink_ble::{BleConfig, BtleAdapter};
//! use scratchlink_core::{Agent, BleAdapter, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = BtleAdapter::new(BleConfig::default()).await?;
//! adapter.enable().await?;
//!
//! let agent = Agent::new(Arc::new(adapter), SessionConfig::default());
//! # Ok(())
//! # }
//! ```

pub mod address;
mod adapter;
pub mod config;
mod error;
mod peripheral;

// Public API exports
pub use adapter::BtleAdapter;
pub use config::BleConfig;
pub use peripheral::{BtleCharacteristic, BtlePeripheral, BtleService};
