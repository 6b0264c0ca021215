//! JSON-RPC message codec
//!
//! Builds and parses protocol frames. Replies (results and errors) always carry
//! the ID of the request that triggered them; agent-initiated pushes draw a
//! fresh ID from a process-wide counter and never correlate with a request.

use core::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// JSON-RPC version tag carried by every frame
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol identifier returned by `getVersion`
pub const PROTOCOL_VERSION: &str = "1.3";

/// Push sent for every matching advertisement during discovery
pub const DID_DISCOVER_PERIPHERAL: &str = "didDiscoverPeripheral";

/// Push sent for every characteristic value change on a subscription
pub const CHARACTERISTIC_DID_CHANGE: &str = "characteristicDidChange";

/// Encoding tag for byte payloads
pub const BASE64_ENCODING: &str = "base64";

static NEXT_PUSH_ID: AtomicI64 = AtomicI64::new(0);

fn next_push_id() -> i64 {
    NEXT_PUSH_ID.fetch_add(1, Ordering::Relaxed) + 1
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

/// Read an explicit `null` the same as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ----------------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------------

/// Request methods understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetVersion,
    Discover,
    Connect,
    StartNotifications,
    StopNotifications,
    Write,
    Read,
}

impl Method {
    /// Look up a method by its wire name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "getVersion" => Some(Method::GetVersion),
            "discover" => Some(Method::Discover),
            "connect" => Some(Method::Connect),
            "startNotifications" => Some(Method::StartNotifications),
            "stopNotifications" => Some(Method::StopNotifications),
            "write" => Some(Method::Write),
            "read" => Some(Method::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetVersion => "getVersion",
            Method::Discover => "discover",
            Method::Connect => "connect",
            Method::StartNotifications => "startNotifications",
            Method::StopNotifications => "stopNotifications",
            Method::Write => "write",
            Method::Read => "read",
        }
    }

    /// Whether the method needs a connected device
    pub fn requires_device(&self) -> bool {
        matches!(
            self,
            Method::StartNotifications | Method::StopNotifications | Method::Write | Method::Read
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Frames
// ----------------------------------------------------------------------------

/// A request or push frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Success reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub id: i64,
    pub jsonrpc: String,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// Error reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub id: i64,
    pub jsonrpc: String,
    pub error: String,
}

/// Any frame the agent writes to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Push(Message),
    Result(ResultFrame),
    Error(ErrorFrame),
}

impl Frame {
    /// Serialize to the wire representation
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn id(&self) -> i64 {
        match self {
            Frame::Push(message) => message.id,
            Frame::Result(result) => result.id,
            Frame::Error(error) => error.id,
        }
    }
}

impl Message {
    /// Parse one inbound frame
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Build an agent-initiated push with a fresh ID
    pub fn new_push<P: Serialize>(method: &str, params: P) -> Frame {
        let params = serde_json::to_value(params).unwrap_or_else(|e| {
            error!("Failed to encode {} params: {}", method, e);
            Value::Null
        });
        Frame::Push(Message {
            id: next_push_id(),
            jsonrpc: default_jsonrpc(),
            method: method.to_string(),
            params,
        })
    }

    /// Frames without a method look like replies; they are never dispatched
    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    /// Decode the params against the request's expected shape
    ///
    /// Absent or `null` params decode as an empty object, so a missing
    /// required field reports which field is missing.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.params.is_null() {
            T::deserialize(Value::Object(Map::new()))
        } else {
            T::deserialize(&self.params)
        }
    }

    /// Success reply carrying this request's ID
    pub fn respond(&self, result: Value) -> Frame {
        Frame::Result(ResultFrame {
            id: self.id,
            jsonrpc: default_jsonrpc(),
            result,
            encoding: None,
        })
    }

    /// Success reply with a base64-encoded byte payload
    pub fn respond_bytes(&self, buf: &[u8]) -> Frame {
        Frame::Result(ResultFrame {
            id: self.id,
            jsonrpc: default_jsonrpc(),
            result: Value::String(BASE64.encode(buf)),
            encoding: Some(BASE64_ENCODING.to_string()),
        })
    }

    /// Error reply carrying this request's ID
    pub fn error_of(&self, reason: impl fmt::Display) -> Frame {
        Frame::Error(ErrorFrame {
            id: self.id,
            jsonrpc: default_jsonrpc(),
            error: reason.to_string(),
        })
    }
}
