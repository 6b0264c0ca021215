//! Adapter access, scanning and connection setup
//!
//! A scan runs inside [`BtleAdapter::scan`]: it consumes the adapter's event
//! stream and reports an [`Advertisement`] for every discovered or updated
//! peripheral until [`BtleAdapter::stop_scan`] is called.
//!
//! Stop requests bump a generation counter. A scan only reacts to requests
//! made after it started, so a stop aimed at an earlier (possibly aborted)
//! scan never ends the next one.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use scratchlink_core::{Advertisement, BleAdapter, BleError, BleResult, ScanCallback};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::address::{matches_peripheral_id, peripheral_key};
use crate::config::BleConfig;
use crate::error::BtleResultExt;
use crate::peripheral::BtlePeripheral;

// ----------------------------------------------------------------------------
// Scan Control
// ----------------------------------------------------------------------------

/// Stop requests shared by every scan of one adapter
pub(crate) struct ScanStop {
    generation: watch::Sender<u64>,
}

impl ScanStop {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Listen for stop requests made from now on
    pub(crate) fn listen(&self) -> watch::Receiver<u64> {
        let mut receiver = self.generation.subscribe();
        receiver.borrow_and_update();
        receiver
    }

    /// Ask every current listener to stop
    pub(crate) fn request(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}

/// Stops the radio scan if the scan task is dropped before finishing
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }

    async fn finish(mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop BLE scan: {}", e);
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        debug!("Failed to stop abandoned BLE scan: {}", e);
                    }
                });
            }
            Err(_) => warn!("BLE scan abandoned outside a runtime"),
        }
    }
}

// ----------------------------------------------------------------------------
// Adapter Implementation
// ----------------------------------------------------------------------------

/// BLE capability provider backed by a btleplug adapter
pub struct BtleAdapter {
    config: BleConfig,
    adapter: Adapter,
    scan_stop: ScanStop,
}

impl BtleAdapter {
    /// Acquire the configured system adapter
    pub async fn new(config: BleConfig) -> BleResult<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| BleError::AdapterUnavailable(format!("failed to create manager: {}", e)))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BleError::AdapterUnavailable(format!("failed to list adapters: {}", e)))?;

        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or_else(|| {
                BleError::AdapterUnavailable(format!(
                    "no BLE adapter at index {}",
                    config.adapter_index
                ))
            })?;

        info!("BLE adapter {} selected", config.adapter_index);
        Ok(Self {
            config,
            adapter,
            scan_stop: ScanStop::new(),
        })
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    /// Build an advertisement snapshot from the adapter's view of a peripheral
    async fn advertisement(&self, id: &PeripheralId) -> Option<Advertisement> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;

        Some(Advertisement {
            address: peripheral_key(peripheral.id(), properties.address),
            local_name: properties.local_name.unwrap_or_default(),
            rssi: properties.rssi.unwrap_or_default(),
            services: properties.services,
        })
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> BleResult<Peripheral> {
        let peripherals = self.adapter.peripherals().await.during("connect")?;
        for peripheral in peripherals {
            let address = match peripheral.properties().await {
                Ok(Some(properties)) => properties.address,
                _ => peripheral.address(),
            };
            if matches_peripheral_id(&peripheral_key(peripheral.id(), address), peripheral_id) {
                return Ok(peripheral);
            }
        }

        Err(BleError::PeripheralNotFound {
            peripheral_id: peripheral_id.to_string(),
        })
    }
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    type Device = BtlePeripheral;

    async fn enable(&self) -> BleResult<()> {
        let info = self
            .adapter
            .adapter_info()
            .await
            .map_err(|e| BleError::AdapterUnavailable(e.to_string()))?;
        info!("BLE adapter ready: {}", info);
        Ok(())
    }

    async fn scan(&self, on_result: ScanCallback) -> BleResult<()> {
        let mut stop = self.scan_stop.listen();
        let mut events = self.adapter.events().await.during("scan")?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .during("scan")?;
        let guard = ScanGuard::new(self.adapter.clone());
        debug!("BLE scan started");

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        if let Some(advertisement) = self.advertisement(&id).await {
                            on_result(advertisement);
                        }
                    }
                    Some(other) => trace!("Ignoring adapter event {:?}", other),
                    None => break,
                },
            }
        }

        guard.finish().await;
        debug!("BLE scan stopped");
        Ok(())
    }

    async fn stop_scan(&self) -> BleResult<()> {
        self.scan_stop.request();
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> BleResult<BtlePeripheral> {
        let peripheral = self.find_peripheral(peripheral_id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            timeout(self.config.connection_timeout(), peripheral.connect())
                .await
                .map_err(|_| BleError::Timeout {
                    operation: "connect",
                })?
                .during("connect")?;
        }
        peripheral.discover_services().await.during("connect")?;

        info!("Connected to peripheral {}", peripheral_id);
        BtlePeripheral::start(peripheral).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_earlier_stop_request_does_not_end_new_scan() {
        let stop = ScanStop::new();
        stop.request();
        stop.request();

        let mut listener = stop.listen();
        let waited = tokio::time::timeout(Duration::from_millis(50), listener.changed()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_stop_request_reaches_running_scan() {
        let stop = ScanStop::new();
        let mut listener = stop.listen();

        // Requested while the scan is busy elsewhere, observed on the next wait
        stop.request();
        let waited = tokio::time::timeout(Duration::from_millis(50), listener.changed()).await;
        assert!(matches!(waited, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_stop_request_reaches_every_listener() {
        let stop = ScanStop::new();
        let mut first = stop.listen();
        let mut second = stop.listen();

        stop.request();
        assert!(first.changed().await.is_ok());
        assert!(second.changed().await.is_ok());
    }
}
