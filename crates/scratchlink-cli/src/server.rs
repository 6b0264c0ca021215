//! WebSocket server carrying client sessions
//!
//! Each accepted connection on the configured path becomes one session of the
//! shared [`Agent`]. Text and binary messages are both treated as frames; the
//! WebSocket layer enforces the same message size bound as the session.

use std::future::{ready, Future};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use scratchlink_core::{Agent, BleAdapter, FrameSink, InboundFrame, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::Result;

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// Listener serving sessions of one agent
pub struct Server<A: BleAdapter> {
    agent: Agent<A>,
    listener: TcpListener,
    path: String,
}

impl<A: BleAdapter> Server<A> {
    /// Bind the listener
    pub async fn bind(address: SocketAddr, path: impl Into<String>, agent: Agent<A>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            agent,
            listener,
            path: path.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        info!(
            "Listening on ws://{}{}",
            self.listener.local_addr()?,
            self.path
        );

        loop {
            let (stream, peer) = accept_with_backoff(|| self.listener.accept()).await;

            let agent = self.agent.clone();
            let path = self.path.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(agent, stream, peer, path).await {
                    warn!("Client {} error: {}", peer, e);
                }
            });
        }
    }

    /// Accept connections until `shutdown` completes
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) -> Result<()> {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Server shutting down");
                Ok(())
            }
        }
    }
}

/// Pause after a failed accept; errors such as EMFILE persist for a while
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                error!("Accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------------

async fn handle_connection<A: BleAdapter>(
    agent: Agent<A>,
    stream: TcpStream,
    peer: SocketAddr,
    path: String,
) -> Result<()> {
    let max_size = agent.config().max_frame_size;
    let config = WebSocketConfig {
        max_message_size: Some(max_size),
        max_frame_size: Some(max_size),
        ..Default::default()
    };

    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            debug!("Rejecting {} request for {}", peer, request.uri().path());
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = accept_hdr_async_with_config(stream, check_path, Some(config)).await?;
    info!("Client connected: {}", peer);

    let (write, read) = ws.split();
    let frames = read.filter_map(|message| ready(inbound_frame(message)));

    let result = agent.serve(Box::pin(frames), WsFrameSink(write)).await;
    info!("Client disconnected: {}", peer);
    result.map_err(Into::into)
}

/// Map one WebSocket read onto the session's frame stream
fn inbound_frame(message: std::result::Result<Message, WsError>) -> Option<InboundFrame> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
        Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
        Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
        // Control frames are answered by tungstenite itself
        Ok(_) => None,
        Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size })) => {
            Some(Err(TransportError::FrameTooLarge { size, max_size }))
        }
        Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
            Some(Err(TransportError::Closed))
        }
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}

/// Write half of a client WebSocket
struct WsFrameSink(SplitSink<WebSocketStream<TcpStream>, Message>);

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: String) -> std::result::Result<(), TransportError> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> std::result::Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_errors_back_off() {
        let mut failures = 2;
        let started = std::time::Instant::now();

        let accepted = accept_with_backoff(|| {
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::new(std::io::ErrorKind::Other, "too many open files"))
            } else {
                Ok(7)
            };
            ready(result)
        })
        .await;

        assert_eq!(accepted, 7);
        assert!(started.elapsed() >= ACCEPT_BACKOFF * 2);
    }

    #[test]
    fn test_text_and_binary_are_frames() {
        assert_eq!(
            inbound_frame(Ok(Message::Text("{}".to_string()))),
            Some(Ok(b"{}".to_vec()))
        );
        assert_eq!(
            inbound_frame(Ok(Message::Binary(vec![1, 2]))),
            Some(Ok(vec![1, 2]))
        );
    }

    #[test]
    fn test_control_frames_are_skipped() {
        assert_eq!(inbound_frame(Ok(Message::Ping(vec![]))), None);
        assert_eq!(inbound_frame(Ok(Message::Pong(vec![]))), None);
    }

    #[test]
    fn test_close_and_oversize() {
        assert_eq!(
            inbound_frame(Ok(Message::Close(None))),
            Some(Err(TransportError::Closed))
        );
        assert_eq!(
            inbound_frame(Err(WsError::Capacity(CapacityError::MessageTooLong {
                size: 70_000,
                max_size: 65_536,
            }))),
            Some(Err(TransportError::FrameTooLarge {
                size: 70_000,
                max_size: 65_536,
            }))
        );
    }
}
