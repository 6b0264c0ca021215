//! BLE capability provider interface
//!
//! The protocol engine never touches a radio directly. It drives these traits,
//! implemented by a platform crate (`scratchlink-ble`) or by test fakes.
//!
//! Callbacks are invoked on the provider's own execution context, so they must
//! not block; the engine only hands the value off to a queue from inside them.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BleResult;
use crate::types::Advertisement;

/// Receives every advertisement observed during a scan
pub type ScanCallback = Arc<dyn Fn(Advertisement) + Send + Sync>;

/// Receives every value change of a subscribed characteristic
pub type NotificationCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

// ----------------------------------------------------------------------------
// Capability Traits
// ----------------------------------------------------------------------------

/// The process-wide BLE adapter
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    type Device: BleDevice;

    /// Power up / acquire the adapter
    async fn enable(&self) -> BleResult<()>;

    /// Scan until [`BleAdapter::stop_scan`] is called, reporting each advertisement
    ///
    /// Stopping is advisory: the call returns some time after `stop_scan`.
    async fn scan(&self, on_result: ScanCallback) -> BleResult<()>;

    /// Ask a running scan to return
    async fn stop_scan(&self) -> BleResult<()>;

    /// Open a connection with default timing parameters
    async fn connect(&self, peripheral_id: &str) -> BleResult<Self::Device>;
}

/// A connected peripheral
#[async_trait]
pub trait BleDevice: Send + Sync + 'static {
    type Characteristic: BleCharacteristic;
    type Service: BleService<Characteristic = Self::Characteristic>;

    /// Discover the services with the given UUIDs
    async fn discover_services(&self, ids: &[Uuid]) -> BleResult<Vec<Self::Service>>;

    /// Release the connection
    async fn disconnect(&self) -> BleResult<()>;
}

/// A GATT service of a connected peripheral
#[async_trait]
pub trait BleService: Send + Sync {
    type Characteristic: BleCharacteristic;

    fn uuid(&self) -> Uuid;

    /// Discover the characteristics with the given UUIDs
    async fn discover_characteristics(&self, ids: &[Uuid])
        -> BleResult<Vec<Self::Characteristic>>;
}

/// A GATT characteristic of a connected peripheral
#[async_trait]
pub trait BleCharacteristic: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    /// One-shot read of the current value
    async fn read(&self) -> BleResult<Vec<u8>>;

    /// Write without acknowledgment, returning the number of bytes written
    async fn write_without_response(&self, data: &[u8]) -> BleResult<usize>;

    /// Acknowledged write, returning the number of bytes written
    async fn write_with_response(&self, data: &[u8]) -> BleResult<usize>;

    /// Install (`Some`) or remove (`None`) the value-change callback
    async fn enable_notifications(&self, callback: Option<NotificationCallback>)
        -> BleResult<()>;
}
