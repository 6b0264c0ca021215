//! Peripheral identifiers as seen by web clients
//!
//! Where the platform exposes the real Bluetooth address it is used as the
//! `peripheralId` (`AA:BB:CC:DD:EE:FF`). macOS hides addresses and reports all
//! zeros, so there the platform's opaque peripheral ID is used instead.

use core::fmt;

use btleplug::api::BDAddr;

/// The `peripheralId` reported for a peripheral
pub fn peripheral_key(id: impl fmt::Display, address: BDAddr) -> String {
    if address.into_inner() == [0u8; 6] {
        id.to_string()
    } else {
        address.to_string()
    }
}

/// Whether a client-supplied `peripheralId` names the given key
pub fn matches_peripheral_id(key: &str, requested: &str) -> bool {
    key.eq_ignore_ascii_case(requested.trim())
}
