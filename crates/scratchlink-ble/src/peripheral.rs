//! Connected peripheral, its services and characteristics
//!
//! btleplug delivers every notification of a peripheral on one stream. A pump
//! task per connection routes each value to the callbacks registered for its
//! characteristic. Routes are keyed by service and characteristic UUID; the
//! notification itself only names the characteristic, so a value is delivered
//! to every subscribed service exposing that characteristic UUID.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, Service, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use scratchlink_core::{
    BleCharacteristic, BleDevice, BleResult, BleService, NotificationCallback,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::error::BtleResultExt;

type Callbacks = Arc<RwLock<NotificationRoutes>>;

// ----------------------------------------------------------------------------
// Notification Routes
// ----------------------------------------------------------------------------

/// Callbacks of one peripheral keyed by (service, characteristic)
#[derive(Default)]
pub(crate) struct NotificationRoutes {
    routes: HashMap<(Uuid, Uuid), NotificationCallback>,
}

impl NotificationRoutes {
    pub(crate) fn insert(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        callback: NotificationCallback,
    ) {
        self.routes.insert((service, characteristic), callback);
    }

    pub(crate) fn remove(&mut self, service: Uuid, characteristic: Uuid) -> bool {
        self.routes.remove(&(service, characteristic)).is_some()
    }

    /// Callbacks receiving a notification for `characteristic`
    pub(crate) fn targets(&self, characteristic: Uuid) -> Vec<NotificationCallback> {
        self.routes
            .iter()
            .filter(|((_, c), _)| *c == characteristic)
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.routes.clear();
    }
}

// ----------------------------------------------------------------------------
// Peripheral
// ----------------------------------------------------------------------------

/// A connected peripheral
pub struct BtlePeripheral {
    peripheral: Peripheral,
    callbacks: Callbacks,
    pump: JoinHandle<()>,
}

impl BtlePeripheral {
    /// Wrap a connected peripheral and start routing its notifications
    pub(crate) async fn start(peripheral: Peripheral) -> BleResult<Self> {
        let callbacks: Callbacks = Arc::new(RwLock::new(NotificationRoutes::default()));
        let mut notifications = peripheral.notifications().await.during("connect")?;

        let routes = callbacks.clone();
        let id = peripheral.id();
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let targets = routes.read().await.targets(notification.uuid);
                if targets.is_empty() {
                    trace!("Unrouted notification from {}", notification.uuid);
                }
                for callback in targets {
                    callback(notification.value.clone());
                }
            }
            debug!("Notification stream for {:?} ended", id);
        });

        Ok(Self {
            peripheral,
            callbacks,
            pump,
        })
    }
}

impl Drop for BtlePeripheral {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl BleDevice for BtlePeripheral {
    type Characteristic = BtleCharacteristic;
    type Service = BtleService;

    async fn discover_services(&self, ids: &[Uuid]) -> BleResult<Vec<BtleService>> {
        if self.peripheral.services().is_empty() {
            self.peripheral
                .discover_services()
                .await
                .during("discover services")?;
        }

        Ok(self
            .peripheral
            .services()
            .into_iter()
            .filter(|service| ids.contains(&service.uuid))
            .map(|service| BtleService {
                service,
                peripheral: self.peripheral.clone(),
                callbacks: self.callbacks.clone(),
            })
            .collect())
    }

    async fn disconnect(&self) -> BleResult<()> {
        self.pump.abort();
        self.callbacks.write().await.clear();
        self.peripheral.disconnect().await.during("disconnect")?;
        info!("Disconnected from peripheral {:?}", self.peripheral.id());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Service
// ----------------------------------------------------------------------------

/// A GATT service of a connected peripheral
pub struct BtleService {
    service: Service,
    peripheral: Peripheral,
    callbacks: Callbacks,
}

#[async_trait]
impl BleService for BtleService {
    type Characteristic = BtleCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn discover_characteristics(&self, ids: &[Uuid]) -> BleResult<Vec<BtleCharacteristic>> {
        Ok(self
            .service
            .characteristics
            .iter()
            .filter(|characteristic| ids.contains(&characteristic.uuid))
            .map(|characteristic| BtleCharacteristic {
                characteristic: characteristic.clone(),
                peripheral: self.peripheral.clone(),
                callbacks: self.callbacks.clone(),
            })
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Characteristic
// ----------------------------------------------------------------------------

/// A GATT characteristic of a connected peripheral
#[derive(Clone)]
pub struct BtleCharacteristic {
    characteristic: Characteristic,
    peripheral: Peripheral,
    callbacks: Callbacks,
}

#[async_trait]
impl BleCharacteristic for BtleCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn read(&self) -> BleResult<Vec<u8>> {
        self.peripheral
            .read(&self.characteristic)
            .await
            .during("read")
    }

    async fn write_without_response(&self, data: &[u8]) -> BleResult<usize> {
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithoutResponse)
            .await
            .during("write")?;
        trace!("Wrote {} bytes to {}", data.len(), self.characteristic.uuid);
        Ok(data.len())
    }

    async fn write_with_response(&self, data: &[u8]) -> BleResult<usize> {
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithResponse)
            .await
            .during("write")?;
        trace!(
            "Wrote {} bytes to {} (acknowledged)",
            data.len(),
            self.characteristic.uuid
        );
        Ok(data.len())
    }

    async fn enable_notifications(&self, callback: Option<NotificationCallback>) -> BleResult<()> {
        let uuid = self.characteristic.uuid;
        let service = self.characteristic.service_uuid;
        match callback {
            Some(callback) => {
                self.callbacks.write().await.insert(service, uuid, callback);
                if let Err(e) = self
                    .peripheral
                    .subscribe(&self.characteristic)
                    .await
                    .during("enable notifications")
                {
                    self.callbacks.write().await.remove(service, uuid);
                    return Err(e);
                }
                debug!("Notifications enabled on {}/{}", service, uuid);
            }
            None => {
                self.callbacks.write().await.remove(service, uuid);
                self.peripheral
                    .unsubscribe(&self.characteristic)
                    .await
                    .during("disable notifications")?;
                debug!("Notifications disabled on {}/{}", service, uuid);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> NotificationCallback {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_routes_are_keyed_by_service() {
        let first_service = Uuid::from_u128(1);
        let second_service = Uuid::from_u128(2);
        let characteristic = Uuid::from_u128(3);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut routes = NotificationRoutes::default();
        routes.insert(first_service, characteristic, counting(&first));
        routes.insert(second_service, characteristic, counting(&second));
        assert_eq!(routes.targets(characteristic).len(), 2);

        // Removing one service keeps the other subscribed
        assert!(routes.remove(first_service, characteristic));
        assert_eq!(routes.targets(characteristic).len(), 1);
        for callback in routes.targets(characteristic) {
            callback(vec![1]);
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resubscribing_replaces_callback() {
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(3);
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));

        let mut routes = NotificationRoutes::default();
        routes.insert(service, characteristic, counting(&old));
        routes.insert(service, characteristic, counting(&new));

        let targets = routes.targets(characteristic);
        assert_eq!(targets.len(), 1);
        targets[0](vec![1]);
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);

        routes.clear();
        assert!(routes.targets(characteristic).is_empty());
        assert!(routes.targets(Uuid::from_u128(9)).is_empty());
    }
}
