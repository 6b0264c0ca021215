//! Integration tests for the WebSocket server
//!
//! Serves an agent backed by an adapter with no reachable peripherals and
//! talks to it with a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use scratchlink_cli::Server;
use scratchlink_core::{
    Agent, BleAdapter, BleCharacteristic, BleDevice, BleError, BleResult, BleService,
    NotificationCallback, ScanCallback, SessionConfig,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Adapter whose scans find nothing and whose connects always fail
#[derive(Default)]
struct EmptyAdapter {
    stopped: Notify,
}

enum NoDevice {}
enum NoService {}

#[derive(Clone)]
enum NoCharacteristic {}

#[async_trait]
impl BleAdapter for EmptyAdapter {
    type Device = NoDevice;

    async fn enable(&self) -> BleResult<()> {
        Ok(())
    }

    async fn scan(&self, _on_result: ScanCallback) -> BleResult<()> {
        self.stopped.notified().await;
        Ok(())
    }

    async fn stop_scan(&self) -> BleResult<()> {
        self.stopped.notify_one();
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> BleResult<NoDevice> {
        Err(BleError::PeripheralNotFound {
            peripheral_id: peripheral_id.to_string(),
        })
    }
}

#[async_trait]
impl BleDevice for NoDevice {
    type Characteristic = NoCharacteristic;
    type Service = NoService;

    async fn discover_services(&self, _ids: &[Uuid]) -> BleResult<Vec<NoService>> {
        match *self {}
    }

    async fn disconnect(&self) -> BleResult<()> {
        match *self {}
    }
}

#[async_trait]
impl BleService for NoService {
    type Characteristic = NoCharacteristic;

    fn uuid(&self) -> Uuid {
        match *self {}
    }

    async fn discover_characteristics(&self, _ids: &[Uuid]) -> BleResult<Vec<NoCharacteristic>> {
        match *self {}
    }
}

#[async_trait]
impl BleCharacteristic for NoCharacteristic {
    fn uuid(&self) -> Uuid {
        match *self {}
    }

    async fn read(&self) -> BleResult<Vec<u8>> {
        match *self {}
    }

    async fn write_without_response(&self, _data: &[u8]) -> BleResult<usize> {
        match *self {}
    }

    async fn write_with_response(&self, _data: &[u8]) -> BleResult<usize> {
        match *self {}
    }

    async fn enable_notifications(&self, _callback: Option<NotificationCallback>) -> BleResult<()> {
        match *self {}
    }
}

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: SessionConfig) -> SocketAddr {
    let agent = Agent::new(Arc::new(EmptyAdapter::default()), config);
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), "/scratch/ble", agent)
        .await
        .expect("Failed to bind server");
    let address = server.local_addr().unwrap();
    tokio::spawn(server.run());
    address
}

async fn connect(address: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/scratch/ble", address))
        .await
        .expect("Failed to connect");
    client
}

async fn request(client: &mut Client, id: i64, method: &str, params: Value) -> Value {
    let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    client.send(Message::Text(frame.to_string())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), client.next())
        .await
        .expect("Reply should arrive within timeout")
        .expect("Connection should stay open")
        .unwrap();
    match reply {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected message {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_get_version_over_websocket() {
    let address = start_server(SessionConfig::default()).await;
    let mut client = connect(address).await;

    let reply = request(&mut client, 1, "getVersion", json!({})).await;
    assert_eq!(
        reply,
        json!({ "jsonrpc": "2.0", "id": 1, "result": { "protocol": "1.3" } })
    );
}

#[tokio::test]
async fn test_connect_failure_is_an_error_reply() {
    let address = start_server(SessionConfig::default()).await;
    let mut client = connect(address).await;

    let reply = request(
        &mut client,
        2,
        "connect",
        json!({ "peripheralId": "AA:BB:CC:DD:EE:FF" }),
    )
    .await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["error"], "peripheral not found: AA:BB:CC:DD:EE:FF");

    // The session survives a failed request
    let reply = request(&mut client, 3, "getVersion", json!({})).await;
    assert_eq!(reply["id"], 3);
}

#[tokio::test]
async fn test_other_paths_are_not_upgraded() {
    let address = start_server(SessionConfig::default()).await;

    match connect_async(format!("ws://{}/other", address)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("upgrade on the wrong path should fail"),
    }
}

#[tokio::test]
async fn test_oversize_message_closes_connection() {
    let address = start_server(SessionConfig::default().with_max_frame_size(1024)).await;
    let mut client = connect(address).await;

    let big = json!({ "id": 1, "method": "write", "params": { "message": "A".repeat(4096) } });
    let _ = client.send(Message::Text(big.to_string())).await;

    // Only a close (or a dropped connection) may follow
    loop {
        match timeout(Duration::from_secs(2), client.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => break,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame {}", text),
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("connection should close"),
        }
    }
}
