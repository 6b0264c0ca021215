//! Notification relay
//!
//! Binds a push producer to each subscribed characteristic. Value changes
//! arrive on the provider's execution context and are queued, without
//! blocking, as `characteristicDidChange` pushes on the session's outbound path.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, trace};

use crate::ble::{BleCharacteristic, NotificationCallback};
use crate::error::BleResult;
use crate::protocol::{Message, BASE64_ENCODING, CHARACTERISTIC_DID_CHANGE};
use crate::transport::Outbound;
use crate::types::{CharacteristicChanged, CharacteristicKey};

/// Active subscriptions of one session
pub struct NotificationRelay<C> {
    outbound: Outbound,
    subscriptions: HashMap<CharacteristicKey, C>,
}

impl<C: BleCharacteristic> NotificationRelay<C> {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            subscriptions: HashMap::new(),
        }
    }

    /// Enable value-change pushes for `characteristic`
    ///
    /// Subscribing again replaces the previous callback.
    pub async fn subscribe(&mut self, key: CharacteristicKey, characteristic: C) -> BleResult<()> {
        let callback = notification_callback(key, self.outbound.clone());
        characteristic.enable_notifications(Some(callback)).await?;

        if self.subscriptions.insert(key, characteristic).is_some() {
            debug!("Replaced subscription {}", key);
        } else {
            debug!("Subscribed to {}", key);
        }
        Ok(())
    }

    /// Disable pushes for `key`; returns whether a subscription existed
    pub async fn unsubscribe(&mut self, key: &CharacteristicKey) -> BleResult<bool> {
        let Some(characteristic) = self.subscriptions.get(key) else {
            return Ok(false);
        };

        characteristic.enable_notifications(None).await?;
        self.subscriptions.remove(key);
        debug!("Unsubscribed from {}", key);
        Ok(true)
    }

    pub fn is_subscribed(&self, key: &CharacteristicKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drop every subscription, disabling callbacks on a best-effort basis
    pub async fn clear(&mut self) {
        for (key, characteristic) in self.subscriptions.drain() {
            if let Err(e) = characteristic.enable_notifications(None).await {
                debug!("Failed to disable notifications on {}: {}", key, e);
            }
        }
    }
}

fn notification_callback(key: CharacteristicKey, outbound: Outbound) -> NotificationCallback {
    Arc::new(move |value: Vec<u8>| {
        trace!("Value change on {} ({} bytes)", key, value.len());
        outbound.push(Message::new_push(
            CHARACTERISTIC_DID_CHANGE,
            CharacteristicChanged {
                service_id: key.service_id,
                characteristic_id: key.characteristic_id,
                message: BASE64.encode(&value),
                encoding: BASE64_ENCODING,
            },
        ));
    })
}
