//! Error types for the scratchlink protocol engine
//!
//! Errors are split by how far they reach:
//! - [`ProtocolError`] ends the session it occurred in (and only that session)
//! - [`RequestError`] becomes an error reply for one request; the session continues
//! - [`BleError`] and [`TransportError`] are reported by the collaborators

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Collaborator Errors
// ----------------------------------------------------------------------------

/// Failures reported by a BLE capability provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BleError {
    #[error("BLE adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("peripheral not found: {peripheral_id}")]
    PeripheralNotFound { peripheral_id: String },

    #[error("service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("{operation} failed: {reason}")]
    OperationFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

impl BleError {
    /// Wrap a provider-specific failure for the given operation
    pub fn operation(operation: &'static str, reason: impl ToString) -> Self {
        BleError::OperationFailed {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Failures of the duplex message transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("frame too large: {size} bytes (max: {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,
}

// ----------------------------------------------------------------------------
// Session-fatal Errors
// ----------------------------------------------------------------------------

/// Errors that terminate one session
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max: {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::FrameTooLarge { size, max_size } => {
                ProtocolError::FrameTooLarge { size, max_size }
            }
            other => ProtocolError::Transport(other),
        }
    }
}

// ----------------------------------------------------------------------------
// Per-request Errors
// ----------------------------------------------------------------------------

/// Errors answered with an error reply; the session stays alive
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("encoding format {0:?} not supported")]
    UnsupportedEncoding(String),

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("value too large: {size} bytes (max: {max_size})")]
    ValueOverflow { size: usize, max_size: usize },

    #[error("{0}")]
    Device(#[from] BleError),
}

/// Result type for per-request handlers
pub type RequestResult<T> = core::result::Result<T, RequestError>;

/// Result type for capability provider calls
pub type BleResult<T> = core::result::Result<T, BleError>;
