//! Transport loop and outbound path
//!
//! Inbound, [`InboundRequests`] turns a stream of raw frames into the ordered
//! sequence of requests a session dispatches. Reply-shaped frames are dropped,
//! and the first oversize or malformed frame ends the sequence with an error.
//!
//! Outbound, every writer (dispatcher replies, discovery pushes, notification
//! pushes) goes through one bounded [`Outbound`] queue drained by a single
//! writer task, so frames never interleave on the transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, TransportError};
use crate::protocol::{Frame, Message};

/// One frame as delivered by the duplex transport
pub type InboundFrame = Result<Vec<u8>, TransportError>;

// ----------------------------------------------------------------------------
// Outbound Transport
// ----------------------------------------------------------------------------

/// Write half of a duplex message connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one complete frame
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Flush and close the connection
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Inbound Requests
// ----------------------------------------------------------------------------

/// Lazy sequence of inbound requests for one connection
pub struct InboundRequests<S> {
    frames: S,
    max_frame_size: usize,
    finished: bool,
}

impl<S> InboundRequests<S>
where
    S: Stream<Item = InboundFrame> + Unpin,
{
    pub fn new(frames: S, max_frame_size: usize) -> Self {
        Self {
            frames,
            max_frame_size,
            finished: false,
        }
    }

    /// Next request, `None` at end of stream
    ///
    /// After an error is returned the sequence is finished.
    pub async fn next_request(&mut self) -> Option<Result<Message, ProtocolError>> {
        if self.finished {
            return None;
        }

        loop {
            let bytes = match self.frames.next().await {
                None | Some(Err(TransportError::Closed)) => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(self.fail(e.into()))),
                Some(Ok(bytes)) => bytes,
            };

            if bytes.len() > self.max_frame_size {
                let err = ProtocolError::FrameTooLarge {
                    size: bytes.len(),
                    max_size: self.max_frame_size,
                };
                return Some(Err(self.fail(err)));
            }

            match Message::decode(&bytes) {
                Ok(message) if message.is_request() => return Some(Ok(message)),
                Ok(message) => {
                    trace!("Discarding frame without method (id {})", message.id);
                }
                Err(e) => return Some(Err(self.fail(e.into()))),
            }
        }
    }

    /// Adapt into a `Stream` of requests
    pub fn into_stream(self) -> impl Stream<Item = Result<Message, ProtocolError>> {
        stream::unfold(self, |mut requests| async move {
            let next = requests.next_request().await?;
            Some((next, requests))
        })
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.finished = true;
        err
    }
}

// ----------------------------------------------------------------------------
// Outbound Queue
// ----------------------------------------------------------------------------

/// Cloneable handle onto a session's outbound frame queue
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Frame>,
}

impl Outbound {
    /// Create a queue with the given capacity
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a reply, waiting for room; replies keep request order
    pub async fn send(&self, frame: Frame) -> bool {
        match self.tx.send(frame).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(frame)) => {
                debug!("Outbound closed, dropping frame {}", frame.id());
                false
            }
        }
    }

    /// Queue a push without blocking; dropped when the queue is full
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!("Outbound queue full, dropping push {}", frame.id());
                false
            }
            Err(mpsc::error::TrySendError::Closed(frame)) => {
                debug!("Outbound closed, dropping push {}", frame.id());
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Writer Task
// ----------------------------------------------------------------------------

/// Handle onto the task draining an outbound queue into a [`FrameSink`]
pub struct FrameWriter {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl FrameWriter {
    /// Spawn the writer task
    pub fn spawn<K: FrameSink>(frames: mpsc::Receiver<Frame>, sink: K) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(write_frames(frames, sink, shutdown_rx));
        Self { handle, shutdown }
    }

    /// Flush what is queued, close the sink and wait up to `grace` for it
    pub async fn finish(self, grace: Duration) {
        let _ = self.shutdown.send(());
        let mut handle = self.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("Outbound writer did not finish in {:?}, aborting", grace);
            handle.abort();
        }
    }
}

async fn write_frames<K: FrameSink>(
    mut frames: mpsc::Receiver<Frame>,
    mut sink: K,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if write_frame(&mut sink, frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut shutdown => {
                while let Ok(frame) = frames.try_recv() {
                    if write_frame(&mut sink, frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    frames.close();
    if let Err(e) = sink.close().await {
        debug!("Closing transport failed: {}", e);
    }
}

async fn write_frame<K: FrameSink>(sink: &mut K, frame: Frame) -> Result<(), TransportError> {
    let encoded = match frame.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("Failed to encode frame {}: {}", frame.id(), e);
            return Ok(());
        }
    };

    sink.send_frame(encoded).await.map_err(|e| {
        debug!("Transport write failed: {}", e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn frames(items: Vec<InboundFrame>) -> impl Stream<Item = InboundFrame> + Unpin {
        stream::iter(items)
    }

    fn text(s: &str) -> InboundFrame {
        Ok(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_reply_frames_are_filtered() {
        let mut requests = InboundRequests::new(
            frames(vec![
                text(r#"{"id":1,"jsonrpc":"2.0","result":null}"#),
                text(r#"{"id":2,"jsonrpc":"2.0","method":"getVersion"}"#),
            ]),
            1024,
        );

        let first = requests.next_request().await.unwrap().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(first.method, "getVersion");
        assert!(requests.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_null_method_and_id_are_not_fatal() {
        let mut requests = InboundRequests::new(
            frames(vec![
                text(r#"{"id":1,"jsonrpc":"2.0","method":null,"result":null}"#),
                text(r#"{"id":null,"method":"getVersion"}"#),
                text(r#"{"id":3,"method":"getVersion"}"#),
            ]),
            1024,
        );

        let first = requests.next_request().await.unwrap().unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(first.method, "getVersion");
        let second = requests.next_request().await.unwrap().unwrap();
        assert_eq!(second.id, 3);
        assert!(requests.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_oversize_frame_ends_sequence() {
        let big = format!(r#"{{"id":1,"method":"write","params":"{}"}}"#, "x".repeat(64));
        let mut requests = InboundRequests::new(
            frames(vec![
                Ok(big.into_bytes()),
                text(r#"{"id":2,"method":"getVersion"}"#),
            ]),
            32,
        );

        let err = requests.next_request().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max_size: 32, .. }));
        assert!(requests.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let mut requests = InboundRequests::new(frames(vec![text("{not json")]), 1024);
        let err = requests.next_request().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        assert!(requests.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_transport_ends_cleanly() {
        let mut requests = InboundRequests::new(
            frames(vec![
                text(r#"{"id":1,"method":"getVersion"}"#),
                Err(TransportError::Closed),
                text(r#"{"id":2,"method":"getVersion"}"#),
            ]),
            1024,
        );
        assert!(requests.next_request().await.unwrap().is_ok());
        assert!(requests.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_into_stream_yields_requests_in_order() {
        let requests = InboundRequests::new(
            frames(vec![
                text(r#"{"id":1,"method":"a"}"#),
                text(r#"{"id":2,"method":"b"}"#),
            ]),
            1024,
        );
        let ids: Vec<i64> = requests
            .into_stream()
            .map(|r| r.unwrap().id)
            .collect()
            .await;
        assert_eq!(ids, vec![1, 2]);
    }

    struct VecSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameSink for VecSink {
        async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
            self.0.send(frame).map_err(|e| TransportError::Send(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_on_finish() {
        let (outbound, rx) = Outbound::channel(4);
        let (tx, mut written) = mpsc::unbounded_channel();
        let writer = FrameWriter::spawn(rx, VecSink(tx));

        assert!(outbound.push(Message::new_push("ping", json!({}))));
        assert!(outbound.send(Message::new_push("pong", json!({}))).await);
        writer.finish(Duration::from_secs(1)).await;

        let first: serde_json::Value = serde_json::from_str(&written.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&written.recv().await.unwrap()).unwrap();
        assert_eq!(first["method"], "ping");
        assert_eq!(second["method"], "pong");
        assert!(outbound.is_closed());
    }

    #[test]
    fn test_push_drops_when_full() {
        let (outbound, _rx) = Outbound::channel(1);
        assert!(outbound.push(Message::new_push("a", json!({}))));
        assert!(!outbound.push(Message::new_push("b", json!({}))));
    }
}
