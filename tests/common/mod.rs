//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use inference_router::config::{EndpointConfig, TransportKind};
use inference_router::load_balancer::EndpointId;
use inference_router::load_balancer::endpoint::Endpoint;
use inference_router::observability::{EventKind, EventSink, RouterEvent};
use inference_router::{Call, TransportAdapter, TransportError};
use std::collections::HashMap;
use std::net::SocketAddr;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// REST endpoint definition with default weight and timeout.
pub fn endpoint(model: &str, name: &str, url: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.into(),
        model: model.into(),
        url: url.into(),
        transport: TransportKind::Rest,
        weight: 1,
        timeout_ms: 1_000,
        max_in_flight: None,
    }
}

/// Endpoint pointing nowhere, for use with `ScriptedTransport`.
pub fn scripted_endpoint(model: &str, name: &str) -> EndpointConfig {
    endpoint(model, name, &format!("http://{}.invalid/", name))
}

/// How a scripted instance answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Status(u16),
    Refuse,
    /// Reply after a delay.
    Slow(Duration, String),
    Hang,
}

/// In-memory adapter whose per-instance behavior can be changed mid-test.
#[derive(Default)]
pub struct ScriptedTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<HashMap<String, u32>>,
    probes: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, instance: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(instance.into(), behavior);
    }

    pub fn calls(&self, instance: &str) -> u32 {
        self.calls.lock().unwrap().get(instance).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn probes(&self, instance: &str) -> u32 {
        self.probes.lock().unwrap().get(instance).copied().unwrap_or(0)
    }

    fn behavior(&self, instance: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(instance)
            .cloned()
            .unwrap_or_else(|| Behavior::Reply(instance.to_string()))
    }
}

#[async_trait]
impl TransportAdapter for ScriptedTransport {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        _call: &Call,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let instance = endpoint.id().instance().to_string();
        *self.calls.lock().unwrap().entry(instance.clone()).or_default() += 1;

        let reply = async {
            match self.behavior(&instance) {
                Behavior::Reply(body) => Ok(Bytes::from(body)),
                Behavior::Status(code) => Err(TransportError::Remote {
                    code,
                    message: "scripted".into(),
                }),
                Behavior::Refuse => Err(TransportError::Connection("refused".into())),
                Behavior::Slow(delay, body) => {
                    tokio::time::sleep(delay).await;
                    Ok(Bytes::from(body))
                }
                Behavior::Hang => std::future::pending().await,
            }
        };
        match tokio::time::timeout(timeout, reply).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn probe(&self, endpoint: &Endpoint, _timeout: Duration) -> bool {
        let instance = endpoint.id().instance().to_string();
        *self.probes.lock().unwrap().entry(instance.clone()).or_default() += 1;
        matches!(self.behavior(&instance), Behavior::Reply(_) | Behavior::Slow(..))
    }
}

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RouterEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RouterEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind.name() == name)
            .count()
    }

    pub fn transitions(&self, endpoint: &EndpointId) -> Vec<EventKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.endpoint.as_ref() == Some(endpoint))
            .filter(|e| matches!(e.kind, EventKind::CircuitTransition { .. }))
            .map(|e| e.kind.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: RouterEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A request as seen by the mock backend.
#[derive(Debug, Clone, Default)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(ReceivedRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request);
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a backend that always answers 200 with `response`.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| (200, response.to_string())).await
}

/// How the WebSocket backend treats each accepted connection.
#[derive(Debug, Clone, Copy)]
pub enum WsMode {
    /// Echo every data frame back after a delay.
    Echo(Duration),
    /// Echo one frame, then close the connection.
    CloseAfterOne,
    /// Close as soon as the handshake completes.
    CloseImmediately,
}

/// Start a WebSocket backend on an ephemeral port. The counter tracks
/// accepted connections.
pub async fn start_ws_backend(mode: WsMode) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let accepted = accepted.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                if let WsMode::CloseImmediately = mode {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(message)) = ws.next().await {
                    if !(message.is_text() || message.is_binary()) {
                        continue;
                    }
                    if let WsMode::Echo(delay) = mode {
                        tokio::time::sleep(delay).await;
                    }
                    if ws.send(message).await.is_err() {
                        return;
                    }
                    if let WsMode::CloseAfterOne = mode {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            });
        }
    });
    (addr, connections)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(ReceivedRequest {
        method,
        path,
        headers,
        body: buf[header_end..].to_vec(),
    })
}
