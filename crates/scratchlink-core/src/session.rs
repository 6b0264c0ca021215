//! Per-connection dispatcher and device state machine
//!
//! A [`Session`] processes its requests strictly in arrival order, one at a
//! time, so no two BLE operations of a session ever overlap. It holds at most
//! one connected device (`NO_DEVICE -> CONNECTED` on a successful `connect`,
//! released at teardown or when replaced) and the session's subscriptions.
//!
//! [`Agent`] holds what sessions share: the adapter, the process-wide scan
//! coordinator and the session configuration.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::Stream;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::ble::{BleAdapter, BleCharacteristic, BleDevice, BleService};
use crate::config::SessionConfig;
use crate::discovery::ScanCoordinator;
use crate::error::{BleError, BleResult, ProtocolError, RequestError, RequestResult};
use crate::protocol::{Message, Method, BASE64_ENCODING, PROTOCOL_VERSION};
use crate::relay::NotificationRelay;
use crate::transport::{FrameSink, FrameWriter, InboundFrame, InboundRequests, Outbound};
use crate::types::{
    CharacteristicKey, ConnectParams, DiscoverParams, NotificationsParams, ReadParams, WriteParams,
};

/// Identifies a session within the process
pub type SessionId = u64;

type DeviceCharacteristic<A> = <<A as BleAdapter>::Device as BleDevice>::Characteristic;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const WRITER_GRACE: Duration = Duration::from_secs(1);

async fn with_timeout<T, F>(limit: Option<Duration>, operation: &'static str, fut: F) -> BleResult<T>
where
    F: Future<Output = BleResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BleError::Timeout { operation })?,
        None => fut.await,
    }
}

// ----------------------------------------------------------------------------
// Agent
// ----------------------------------------------------------------------------

/// Shared state behind every session of one adapter
pub struct Agent<A: BleAdapter> {
    adapter: Arc<A>,
    scanner: Arc<ScanCoordinator<A>>,
    config: SessionConfig,
}

impl<A: BleAdapter> Clone for Agent<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            scanner: self.scanner.clone(),
            config: self.config.clone(),
        }
    }
}

impl<A: BleAdapter> Agent<A> {
    pub fn new(adapter: Arc<A>, config: SessionConfig) -> Self {
        let scanner = Arc::new(ScanCoordinator::new(
            adapter.clone(),
            config.scan_stop_grace(),
        ));
        Self {
            adapter,
            scanner,
            config,
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn scanner(&self) -> &Arc<ScanCoordinator<A>> {
        &self.scanner
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session writing to `outbound`
    pub fn session(&self, outbound: Outbound) -> Session<A> {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            adapter: self.adapter.clone(),
            scanner: self.scanner.clone(),
            config: self.config.clone(),
            relay: NotificationRelay::new(outbound.clone()),
            outbound,
            device: None,
        }
    }

    /// Run one connection to completion
    ///
    /// Returns `Ok` on end of stream and the fatal error otherwise; either
    /// way the session is torn down and the sink closed. Other sessions are
    /// unaffected.
    pub async fn serve<S, K>(&self, frames: S, sink: K) -> Result<(), ProtocolError>
    where
        S: Stream<Item = InboundFrame> + Unpin + Send,
        K: FrameSink,
    {
        let (outbound, rx) = Outbound::channel(self.config.outbound_queue_size);
        let writer = FrameWriter::spawn(rx, sink);
        let mut session = self.session(outbound);
        let id = session.id();
        info!("Session {} opened", id);

        let requests = InboundRequests::new(frames, self.config.max_frame_size);
        let result = session.run(requests).await;
        match &result {
            Ok(()) => info!("Session {} closed by peer", id),
            Err(e) => warn!("Session {} terminated: {}", id, e),
        }

        session.teardown().await;
        drop(session);
        writer.finish(WRITER_GRACE).await;
        result
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

struct ConnectedDevice<D> {
    peripheral_id: String,
    device: D,
}

enum Reply {
    Value(Value),
    Bytes(Vec<u8>),
}

/// Dispatcher and state of one connection
pub struct Session<A: BleAdapter> {
    id: SessionId,
    adapter: Arc<A>,
    scanner: Arc<ScanCoordinator<A>>,
    config: SessionConfig,
    outbound: Outbound,
    device: Option<ConnectedDevice<A::Device>>,
    relay: NotificationRelay<DeviceCharacteristic<A>>,
}

impl<A: BleAdapter> Session<A> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    /// Peripheral ID of the connected device
    pub fn peripheral_id(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.peripheral_id.as_str())
    }

    pub fn subscription_count(&self) -> usize {
        self.relay.len()
    }

    /// Dispatch requests until the sequence ends
    pub async fn run<S>(&mut self, mut requests: InboundRequests<S>) -> Result<(), ProtocolError>
    where
        S: Stream<Item = InboundFrame> + Unpin,
    {
        while let Some(request) = requests.next_request().await {
            self.handle(request?).await;
        }
        Ok(())
    }

    /// Handle one request and queue its reply
    ///
    /// Unknown methods are logged and produce no frame at all.
    pub async fn handle(&mut self, request: Message) {
        let Some(method) = Method::parse(&request.method) else {
            warn!(
                "Session {}: unknown command '{}' with params: {}",
                self.id, request.method, request.params
            );
            return;
        };

        debug!("Session {}: {} (id {})", self.id, method, request.id);

        let frame = match self.dispatch(method, &request).await {
            Ok(Reply::Value(value)) => request.respond(value),
            Ok(Reply::Bytes(buf)) => request.respond_bytes(&buf),
            Err(e) => {
                warn!("Session {}: {} (id {}) failed: {}", self.id, method, request.id, e);
                request.error_of(&e)
            }
        };

        self.outbound.send(frame).await;
    }

    async fn dispatch(&mut self, method: Method, request: &Message) -> RequestResult<Reply> {
        match method {
            Method::GetVersion => Ok(Reply::Value(json!({ "protocol": PROTOCOL_VERSION }))),
            Method::Discover => self.discover(request.params()?).await,
            Method::Connect => self.connect(request.params()?).await,
            Method::StartNotifications => self.start_notifications(request.params()?).await,
            Method::StopNotifications => self.stop_notifications(request.params()?).await,
            Method::Write => self.write(request.params()?).await,
            Method::Read => self.read(request.params()?).await,
        }
    }

    /// Release the scan, subscriptions and device owned by this session
    pub async fn teardown(&mut self) {
        self.scanner.stop_owned(self.id).await;
        self.release_device().await;
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    async fn discover(&mut self, params: DiscoverParams) -> RequestResult<Reply> {
        debug!("Session {}: discover filters {:?}", self.id, params.filters);
        self.scanner
            .start(self.id, params.filters, self.outbound.clone())
            .await;
        Ok(Reply::Value(Value::Null))
    }

    /// Connect to a peripheral, stopping any scan first
    ///
    /// A different peripheral is connected before the current one is
    /// released, so a failed attempt keeps the current device. Reconnecting to
    /// the current peripheral releases it first: platforms share one link per
    /// peripheral, so a failed reconnect leaves the session without a device.
    async fn connect(&mut self, params: ConnectParams) -> RequestResult<Reply> {
        self.scanner.stop().await;

        let reconnecting = self.peripheral_id() == Some(params.peripheral_id.as_str());
        if reconnecting {
            self.release_device().await;
        }

        let device = with_timeout(
            self.config.device_timeout(),
            "connect",
            self.adapter.connect(&params.peripheral_id),
        )
        .await?;

        self.release_device().await;
        info!("Session {} connected to {}", self.id, params.peripheral_id);
        self.device = Some(ConnectedDevice {
            peripheral_id: params.peripheral_id,
            device,
        });
        Ok(Reply::Value(Value::Null))
    }

    async fn start_notifications(&mut self, params: NotificationsParams) -> RequestResult<Reply> {
        let key = params.key();
        let characteristic = self.characteristic(key).await?;
        with_timeout(
            self.config.device_timeout(),
            "enable notifications",
            self.relay.subscribe(key, characteristic),
        )
        .await?;
        Ok(Reply::Value(Value::Null))
    }

    async fn stop_notifications(&mut self, params: NotificationsParams) -> RequestResult<Reply> {
        self.connected()?;
        let key = params.key();
        with_timeout(
            self.config.device_timeout(),
            "disable notifications",
            self.relay.unsubscribe(&key),
        )
        .await?;
        Ok(Reply::Value(Value::Null))
    }

    async fn write(&mut self, params: WriteParams) -> RequestResult<Reply> {
        if params.encoding.as_deref() != Some(BASE64_ENCODING) {
            return Err(RequestError::UnsupportedEncoding(
                params.encoding.unwrap_or_default(),
            ));
        }

        let data = BASE64.decode(params.message.as_bytes())?;
        let characteristic = self.characteristic(params.key()).await?;
        let limit = self.config.device_timeout();
        let written = if params.with_response {
            with_timeout(limit, "write", characteristic.write_with_response(&data)).await?
        } else {
            with_timeout(limit, "write", characteristic.write_without_response(&data)).await?
        };

        Ok(Reply::Value(json!(written)))
    }

    async fn read(&mut self, params: ReadParams) -> RequestResult<Reply> {
        let key = params.key();
        let characteristic = self.characteristic(key).await?;
        let limit = self.config.device_timeout();

        if params.start_notifications {
            with_timeout(
                limit,
                "enable notifications",
                self.relay.subscribe(key, characteristic.clone()),
            )
            .await?;
        }

        let value = with_timeout(limit, "read", characteristic.read()).await?;
        if value.len() > self.config.max_value_size {
            return Err(RequestError::ValueOverflow {
                size: value.len(),
                max_size: self.config.max_value_size,
            });
        }

        Ok(Reply::Bytes(value))
    }

    // ------------------------------------------------------------------------
    // Device State
    // ------------------------------------------------------------------------

    fn connected(&self) -> RequestResult<&A::Device> {
        self.device
            .as_ref()
            .map(|connected| &connected.device)
            .ok_or(RequestError::NotConnected)
    }

    async fn characteristic(
        &self,
        key: CharacteristicKey,
    ) -> RequestResult<DeviceCharacteristic<A>> {
        let device = self.connected()?;
        let limit = self.config.device_timeout();

        let services = with_timeout(
            limit,
            "discover services",
            device.discover_services(&[key.service_id]),
        )
        .await?;
        let service = services
            .into_iter()
            .find(|service| service.uuid() == key.service_id)
            .ok_or(BleError::ServiceNotFound(key.service_id))?;

        let characteristics = with_timeout(
            limit,
            "discover characteristics",
            service.discover_characteristics(&[key.characteristic_id]),
        )
        .await?;
        characteristics
            .into_iter()
            .find(|characteristic| characteristic.uuid() == key.characteristic_id)
            .ok_or_else(|| BleError::CharacteristicNotFound(key.characteristic_id).into())
    }

    async fn release_device(&mut self) {
        self.relay.clear().await;

        let Some(connected) = self.device.take() else {
            return;
        };

        match with_timeout(
            self.config.device_timeout(),
            "disconnect",
            connected.device.disconnect(),
        )
        .await
        {
            Ok(()) => info!(
                "Session {} disconnected from {}",
                self.id, connected.peripheral_id
            ),
            Err(e) => warn!(
                "Session {} failed to disconnect from {}: {}",
                self.id, connected.peripheral_id, e
            ),
        }
    }
}
