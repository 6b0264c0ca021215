//! Test utilities for driving sessions against a fake BLE provider
//!
//! [`FakeAdapter`] is a spy: it records scans, stops, connects, writes and
//! disconnects, and its devices echo the last value written to a
//! characteristic back on read. [`TestClient`] plays the web page side of one
//! connection.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as inbound;
use scratchlink_core::{
    uuid_from_short, Advertisement, Agent, BleAdapter, BleCharacteristic, BleDevice, BleError,
    BleResult, BleService, FrameSink, InboundFrame, NotificationCallback, ProtocolError,
    ScanCallback, SessionConfig, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

pub const PERIPHERAL: &str = "AA:BB:CC:DD:EE:FF";
pub const OTHER_PERIPHERAL: &str = "11:22:33:44:55:66";

pub fn service_uuid() -> Uuid {
    uuid_from_short(0xf005)
}

pub fn characteristic_uuid() -> Uuid {
    Uuid::parse_str("5261da01-fa7e-42ab-850b-7c80220097cc").unwrap()
}

pub fn advertisement(address: &str, name: &str, services: &[Uuid]) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        local_name: name.to_string(),
        rssi: -42,
        services: services.to_vec(),
    }
}

// ----------------------------------------------------------------------------
// Fake Provider State
// ----------------------------------------------------------------------------

/// Everything the fake provider observed, shared by the adapter and its devices
#[derive(Default)]
pub struct ProviderState {
    pub scans_started: AtomicUsize,
    pub stop_scan_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub writes: AtomicUsize,
    pub acknowledged_writes: AtomicUsize,
    pub reads: AtomicUsize,
    pub hang_connect: AtomicBool,
    scan_callback: Mutex<Option<ScanCallback>>,
    scan_stopped: Notify,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    notifications: Mutex<HashMap<Uuid, NotificationCallback>>,
}

impl ProviderState {
    /// Deliver an advertisement to the running scan, if any
    pub fn advertise(&self, advertisement: Advertisement) -> bool {
        let callback = self.scan_callback.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(advertisement);
                true
            }
            None => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_callback.lock().unwrap().is_some()
    }

    /// Wait until the scan task has reached the provider
    pub async fn wait_for_scan(&self) {
        timeout(Duration::from_secs(2), async {
            while !self.is_scanning() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scan should start");
    }

    /// Simulate a value change on a characteristic
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) -> bool {
        let callback = self.notifications.lock().unwrap().get(&characteristic).cloned();
        match callback {
            Some(callback) => {
                callback(value.to_vec());
                true
            }
            None => false,
        }
    }

    pub fn has_notifications(&self, characteristic: Uuid) -> bool {
        self.notifications.lock().unwrap().contains_key(&characteristic)
    }

    pub fn set_value(&self, characteristic: Uuid, value: &[u8]) {
        self.values.lock().unwrap().insert(characteristic, value.to_vec());
    }
}

// ----------------------------------------------------------------------------
// Fake Adapter
// ----------------------------------------------------------------------------

pub struct FakeAdapter {
    pub state: Arc<ProviderState>,
    known: HashSet<String>,
    services: HashMap<Uuid, Vec<Uuid>>,
}

impl FakeAdapter {
    /// Adapter knowing [`PERIPHERAL`] and [`OTHER_PERIPHERAL`], each exposing
    /// one service with one characteristic
    pub fn new() -> Self {
        let mut services = HashMap::new();
        services.insert(service_uuid(), vec![characteristic_uuid()]);
        Self {
            state: Arc::new(ProviderState::default()),
            known: [PERIPHERAL, OTHER_PERIPHERAL]
                .into_iter()
                .map(String::from)
                .collect(),
            services,
        }
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    type Device = FakeDevice;

    async fn enable(&self) -> BleResult<()> {
        Ok(())
    }

    async fn scan(&self, on_result: ScanCallback) -> BleResult<()> {
        self.state.scans_started.fetch_add(1, Ordering::SeqCst);
        *self.state.scan_callback.lock().unwrap() = Some(on_result);
        self.state.scan_stopped.notified().await;
        *self.state.scan_callback.lock().unwrap() = None;
        Ok(())
    }

    async fn stop_scan(&self) -> BleResult<()> {
        self.state.stop_scan_calls.fetch_add(1, Ordering::SeqCst);
        self.state.scan_stopped.notify_one();
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> BleResult<FakeDevice> {
        if self.state.hang_connect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if !self.known.contains(peripheral_id) {
            return Err(BleError::PeripheralNotFound {
                peripheral_id: peripheral_id.to_string(),
            });
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDevice {
            state: self.state.clone(),
            services: self.services.clone(),
        })
    }
}

pub struct FakeDevice {
    state: Arc<ProviderState>,
    services: HashMap<Uuid, Vec<Uuid>>,
}

#[async_trait]
impl BleDevice for FakeDevice {
    type Characteristic = FakeCharacteristic;
    type Service = FakeService;

    async fn discover_services(&self, ids: &[Uuid]) -> BleResult<Vec<FakeService>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.services.get(id).map(|characteristics| FakeService {
                    uuid: *id,
                    characteristics: characteristics.clone(),
                    state: self.state.clone(),
                })
            })
            .collect())
    }

    async fn disconnect(&self) -> BleResult<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeService {
    uuid: Uuid,
    characteristics: Vec<Uuid>,
    state: Arc<ProviderState>,
}

#[async_trait]
impl BleService for FakeService {
    type Characteristic = FakeCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn discover_characteristics(&self, ids: &[Uuid]) -> BleResult<Vec<FakeCharacteristic>> {
        Ok(ids
            .iter()
            .filter(|id| self.characteristics.contains(id))
            .map(|id| FakeCharacteristic {
                uuid: *id,
                state: self.state.clone(),
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct FakeCharacteristic {
    uuid: Uuid,
    state: Arc<ProviderState>,
}

#[async_trait]
impl BleCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> BleResult<Vec<u8>> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .values
            .lock()
            .unwrap()
            .get(&self.uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_without_response(&self, data: &[u8]) -> BleResult<usize> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        self.state.set_value(self.uuid, data);
        Ok(data.len())
    }

    async fn write_with_response(&self, data: &[u8]) -> BleResult<usize> {
        self.state.acknowledged_writes.fetch_add(1, Ordering::SeqCst);
        self.write_without_response(data).await
    }

    async fn enable_notifications(&self, callback: Option<NotificationCallback>) -> BleResult<()> {
        let mut notifications = self.state.notifications.lock().unwrap();
        match callback {
            Some(callback) => {
                notifications.insert(self.uuid, callback);
            }
            None => {
                notifications.remove(&self.uuid);
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Test Client
// ----------------------------------------------------------------------------

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.0
            .send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// The web page side of one connection served by an [`Agent`]
pub struct TestClient {
    tx: inbound::UnboundedSender<InboundFrame>,
    rx: mpsc::UnboundedReceiver<String>,
    handle: JoinHandle<Result<(), ProtocolError>>,
    /// Pushes received while waiting for replies
    pub pushes: Vec<Value>,
}

pub fn test_agent(config: SessionConfig) -> (Agent<FakeAdapter>, Arc<ProviderState>) {
    let adapter = FakeAdapter::new();
    let state = adapter.state.clone();
    (Agent::new(Arc::new(adapter), config), state)
}

pub fn fast_config() -> SessionConfig {
    SessionConfig::new().with_scan_stop_grace(Duration::from_millis(200))
}

impl TestClient {
    pub fn connect(agent: &Agent<FakeAdapter>) -> Self {
        let (tx, frames) = inbound::unbounded();
        let (sink_tx, rx) = mpsc::unbounded_channel();
        let agent = agent.clone();
        let handle = tokio::spawn(async move { agent.serve(frames, ChannelSink(sink_tx)).await });
        Self {
            tx,
            rx,
            handle,
            pushes: Vec::new(),
        }
    }

    pub fn send_raw(&self, text: &str) {
        self.tx
            .unbounded_send(Ok(text.as_bytes().to_vec()))
            .expect("session should be accepting frames");
    }

    pub fn send(&self, id: i64, method: &str, params: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_raw(&frame.to_string());
    }

    /// Next outbound frame of any kind
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .ok()??;
        Some(serde_json::from_str(&text).expect("agent wrote invalid JSON"))
    }

    /// Wait for the reply to `id`, collecting any pushes seen on the way
    pub async fn reply(&mut self, id: i64) -> Value {
        loop {
            let frame = self.next_frame().await.expect("expected a reply");
            if frame.get("method").is_some() {
                self.pushes.push(frame);
                continue;
            }
            assert_eq!(frame["id"], json!(id), "reply out of order: {}", frame);
            return frame;
        }
    }

    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(id, method, params);
        self.reply(id).await
    }

    /// Wait briefly for a push with the given method
    pub async fn push(&mut self, method: &str) -> Option<Value> {
        if let Some(index) = self.pushes.iter().position(|p| p["method"] == method) {
            return Some(self.pushes.remove(index));
        }
        loop {
            let frame = self.next_frame().await?;
            if frame["method"] == method {
                return Some(frame);
            }
            self.pushes.push(frame);
        }
    }

    /// Close the connection and wait for the session to finish
    pub async fn close(self) -> Result<(), ProtocolError> {
        drop(self.tx);
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("session should finish")
            .expect("session task panicked")
    }

    /// Wait for the session to end on its own
    pub async fn finished(self) -> Result<(), ProtocolError> {
        let Self { tx, handle, .. } = self;
        let result = timeout(Duration::from_secs(5), handle)
            .await
            .expect("session should finish")
            .expect("session task panicked");
        drop(tx);
        result
    }
}
