//! Streaming transport over WebSocket.
//!
//! # Responsibilities
//! - Keep one persistent connection per endpoint
//! - Map a logical call to one request frame and one reply frame
//! - Re-establish the connection after any failure
//!
//! # Data Flow
//! ```text
//! invoke() ── lock endpoint slot ── take connection (or connect)
//!          ── send {"data", "metadata"} text frame / binary frame
//!          ── read first text/binary reply (control frames skipped)
//!          ── return connection to slot
//! ```
//!
//! # Design Decisions
//! - One exchange per connection at a time: `connection_limit` is 1, so the
//!   router's gate queues callers and the slot lock is never contended by
//!   routed calls
//! - The connection is owned by the exchange while in use; a cancelled or
//!   failed exchange drops it so a stale reply can never reach the next call
//! - A reused connection that turns out dead is replaced once per call

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::load_balancer::endpoint::{Endpoint, EndpointId};
use crate::transport::{Call, TransportAdapter, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Slot = Arc<Mutex<Option<WsStream>>>;

#[derive(Serialize)]
struct RequestFrame<'a> {
    data: &'a str,
    #[serde(skip_serializing_if = "no_metadata")]
    metadata: &'a BTreeMap<String, String>,
}

fn no_metadata(metadata: &&BTreeMap<String, String>) -> bool {
    metadata.is_empty()
}

/// Persistent-connection adapter.
#[derive(Default)]
pub struct WebSocketTransport {
    connections: DashMap<EndpointId, Slot>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &EndpointId) -> Slot {
        self.connections.entry(id.clone()).or_default().clone()
    }

    async fn call_once(&self, endpoint: &Endpoint, call: &Call) -> Result<Bytes, TransportError> {
        let slot = self.slot(endpoint.id());
        let mut guard = slot.lock().await;

        if let Some(mut stream) = guard.take() {
            match exchange(&mut stream, call).await {
                Ok(reply) => {
                    *guard = Some(stream);
                    return Ok(reply);
                }
                Err(TransportError::Connection(e)) => {
                    tracing::debug!(endpoint = %endpoint.id(), error = %e, "Reused connection failed, reconnecting");
                }
                Err(e) => return Err(e),
            }
        }

        let mut stream = connect(endpoint).await?;
        let reply = exchange(&mut stream, call).await?;
        *guard = Some(stream);
        Ok(reply)
    }
}

async fn connect(endpoint: &Endpoint) -> Result<WsStream, TransportError> {
    let (stream, _) = connect_async(endpoint.address().as_str())
        .await
        .map_err(classify)?;
    tracing::debug!(endpoint = %endpoint.id(), "WebSocket connected");
    Ok(stream)
}

fn request_message(call: &Call) -> Result<Message, TransportError> {
    match std::str::from_utf8(&call.payload) {
        Ok(text) => {
            let frame = RequestFrame {
                data: text,
                metadata: &call.metadata,
            };
            let json = serde_json::to_string(&frame)
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            Ok(Message::text(json))
        }
        Err(_) => Ok(Message::binary(call.payload.clone())),
    }
}

async fn exchange(stream: &mut WsStream, call: &Call) -> Result<Bytes, TransportError> {
    stream.send(request_message(call)?).await.map_err(classify)?;

    while let Some(message) = stream.next().await {
        match message.map_err(classify)? {
            Message::Text(text) => return Ok(Bytes::copy_from_slice(text.as_str().as_bytes())),
            Message::Binary(data) => return Ok(data),
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                return Err(TransportError::Connection(format!("closed by peer: {}", reason)));
            }
            // Pings are answered by tungstenite on the next read or write.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Err(TransportError::Connection("connection closed".into()))
}

fn classify(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => TransportError::Remote {
            code: response.status().as_u16(),
            message: "handshake rejected".into(),
        },
        WsError::Url(e) => TransportError::Malformed(e.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}

#[async_trait]
impl TransportAdapter for WebSocketTransport {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        call: &Call,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        match tokio::time::timeout(timeout, self.call_once(endpoint, call)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Open a fresh connection and close it cleanly.
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> bool {
        let attempt = async {
            let mut stream = connect(endpoint).await?;
            let _ = stream.close(None).await;
            Ok::<_, TransportError>(())
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %endpoint.id(), error = %e, "Probe failed");
                false
            }
            Err(_) => false,
        }
    }

    fn connection_limit(&self) -> Option<usize> {
        Some(1)
    }

    async fn release(&self, id: &EndpointId) {
        if let Some((_, slot)) = self.connections.remove(id) {
            if let Some(mut stream) = slot.lock().await.take() {
                let _ = stream.close(None).await;
                tracing::debug!(endpoint = %id, "WebSocket connection closed");
            }
        }
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("endpoints", &self.connections.len())
            .finish()
    }
}
