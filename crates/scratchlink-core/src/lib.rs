//! Protocol engine exposing BLE peripherals to web clients over JSON-RPC
//!
//! A web page opens a message connection to the local agent and drives a BLE
//! peripheral through it: discover, connect, read, write and subscribe. The
//! engine is independent of both the radio and the connection it is served on.
//!
//! ## Architecture
//!
//! - [`protocol`] - Frame codec: requests, replies and pushes
//! - [`transport`] - Inbound request sequence and the single outbound writer
//! - [`session`] - Per-connection dispatcher and device state
//! - [`discovery`] - Process-wide scan coordination and filtering
//! - [`relay`] - Characteristic value change pushes
//! - [`ble`] - Capability traits a BLE provider implements
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scratchlink_core::{Agent, BleAdapter, FrameSink, InboundFrame, SessionConfig};
//! use futures::Stream;
//!
//! # async fn example<A, S, K>(adapter: A, frames: S, sink: K) -> Result<(), Box<dyn std::error::Error>>
//! # where A: BleAdapter, S: Stream<Item = InboundFrame> + Unpin + Send, K: FrameSink {
//! let agent = Agent::new(Arc::new(adapter), SessionConfig::default());
//!
//! // One call per accepted connection; returns when the peer goes away
//! agent.serve(frames, sink).await?;
//! # Ok(())
//! # }
//! ```

pub mod ble;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;
pub mod types;

// Public API exports
pub use ble::{
    BleAdapter, BleCharacteristic, BleDevice, BleService, NotificationCallback, ScanCallback,
};
pub use config::SessionConfig;
pub use discovery::ScanCoordinator;
pub use error::{BleError, BleResult, ProtocolError, RequestError, RequestResult, TransportError};
pub use filter::matches_any;
pub use protocol::{Frame, Message, Method, PROTOCOL_VERSION};
pub use relay::NotificationRelay;
pub use session::{Agent, Session, SessionId};
pub use transport::{FrameSink, FrameWriter, InboundFrame, InboundRequests, Outbound};
pub use types::{
    parse_gatt_uuid, uuid_from_short, Advertisement, CharacteristicKey, Device, DiscoverFilter,
};
