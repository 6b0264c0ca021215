//! Mapping of btleplug failures onto provider errors

use scratchlink_core::BleError;

// ----------------------------------------------------------------------------
// Error Conversion
// ----------------------------------------------------------------------------

/// Convert a btleplug error raised while performing `operation`
pub(crate) fn ble_error(operation: &'static str, err: btleplug::Error) -> BleError {
    match err {
        btleplug::Error::TimedOut(_) => BleError::Timeout { operation },
        btleplug::Error::NotConnected => BleError::operation(operation, "peripheral not connected"),
        btleplug::Error::PermissionDenied => {
            BleError::AdapterUnavailable("permission denied".to_string())
        }
        other => BleError::operation(operation, other),
    }
}

/// Attach the failing operation to a btleplug result
pub(crate) trait BtleResultExt<T> {
    fn during(self, operation: &'static str) -> Result<T, BleError>;
}

impl<T> BtleResultExt<T> for Result<T, btleplug::Error> {
    fn during(self, operation: &'static str) -> Result<T, BleError> {
        self.map_err(|e| ble_error(operation, e))
    }
}
