//! Request parameter and push payload types
//!
//! Field names follow the wire protocol (camelCase). UUID-valued params accept
//! the short forms web clients commonly send: an integer such as `0xf005`, or a
//! 4/8-digit hex string, both expanded against the Bluetooth base UUID.

use core::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// GATT UUIDs
// ----------------------------------------------------------------------------

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16- or 32-bit assigned number to a full 128-bit UUID
pub fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Parse a UUID given either canonically or as a 4/8-digit hex short form
pub fn parse_gatt_uuid(text: &str) -> Option<Uuid> {
    let trimmed = text.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if matches!(hex.len(), 4 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return u32::from_str_radix(hex, 16).ok().map(uuid_from_short);
    }

    Uuid::parse_str(trimmed).ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UuidRepr {
    Short(u32),
    Text(String),
}

impl UuidRepr {
    fn into_uuid<E: de::Error>(self) -> Result<Uuid, E> {
        match self {
            UuidRepr::Short(short) => Ok(uuid_from_short(short)),
            UuidRepr::Text(text) => parse_gatt_uuid(&text)
                .ok_or_else(|| E::custom(format!("invalid UUID: {:?}", text))),
        }
    }
}

fn deserialize_uuid<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    UuidRepr::deserialize(deserializer)?.into_uuid()
}

fn deserialize_uuids<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let reprs = Option::<Vec<UuidRepr>>::deserialize(deserializer)?.unwrap_or_default();
    reprs.into_iter().map(UuidRepr::into_uuid).collect()
}

/// A characteristic addressed by its service and characteristic UUIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicKey {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.characteristic_id)
    }
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

/// Snapshot of a discovered peripheral, pushed as `didDiscoverPeripheral`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub peripheral_id: String,
    pub name: String,
    pub rssi: i16,
}

/// One advertisement observed while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform address, used as the `peripheralId`
    pub address: String,
    /// Advertised local name (empty when absent)
    pub local_name: String,
    pub rssi: i16,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Whether the advertisement lists the given service
    pub fn has_service(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }

    /// Discovery-result snapshot of this advertisement
    pub fn to_device(&self) -> Device {
        Device {
            peripheral_id: self.address.clone(),
            name: self.local_name.clone(),
            rssi: self.rssi,
        }
    }
}

/// A single discovery filter entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default, deserialize_with = "deserialize_uuids")]
    pub services: Vec<Uuid>,
}

/// Params of `discover`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiscoverParams {
    #[serde(default)]
    pub filters: Vec<DiscoverFilter>,
}

// ----------------------------------------------------------------------------
// Device Operations
// ----------------------------------------------------------------------------

/// Params of `connect`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub peripheral_id: String,
}

/// Params of `startNotifications` and `stopNotifications`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsParams {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub service_id: Uuid,
    #[serde(deserialize_with = "deserialize_uuid")]
    pub characteristic_id: Uuid,
}

impl NotificationsParams {
    pub fn key(&self) -> CharacteristicKey {
        CharacteristicKey {
            service_id: self.service_id,
            characteristic_id: self.characteristic_id,
        }
    }
}

/// Params of `write`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteParams {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub service_id: Uuid,
    #[serde(deserialize_with = "deserialize_uuid")]
    pub characteristic_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub with_response: bool,
}

impl WriteParams {
    pub fn key(&self) -> CharacteristicKey {
        CharacteristicKey {
            service_id: self.service_id,
            characteristic_id: self.characteristic_id,
        }
    }
}

/// Params of `read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub service_id: Uuid,
    #[serde(deserialize_with = "deserialize_uuid")]
    pub characteristic_id: Uuid,
    #[serde(default)]
    pub start_notifications: bool,
}

impl ReadParams {
    pub fn key(&self) -> CharacteristicKey {
        CharacteristicKey {
            service_id: self.service_id,
            characteristic_id: self.characteristic_id,
        }
    }
}

/// Params of the `characteristicDidChange` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicChanged {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub message: String,
    pub encoding: &'static str,
}
