//! Transport adapters.
//!
//! # Data Flow
//! ```text
//! Retry controller (one attempt)
//!     → Transports::get(endpoint.transport())
//!     → TransportAdapter::invoke(endpoint, call, timeout)
//!         - http.rs (POST over reqwest)
//!         - websocket.rs (send/receive over a persistent socket)
//!     → Ok(body bytes) | Err(TransportError)
//! ```
//!
//! # Design Decisions
//! - The router treats adapters as opaque capabilities
//! - One adapter per transport kind, shared by all endpoints of that kind
//! - Adapters classify failures; the router decides what is retryable

pub mod http;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::TransportKind;
use crate::load_balancer::endpoint::{Endpoint, EndpointId};

pub use self::http::HttpTransport;
pub use self::websocket::WebSocketTransport;

/// Failure of a single transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    /// The remote answered with an error status.
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },

    /// The request could not be formed or was rejected as malformed.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connection(_) => true,
            TransportError::Remote { code, .. } => *code >= 500,
            TransportError::Malformed(_) => false,
        }
    }

    /// Whether the failure says something about the endpoint's health.
    /// Client-side failures (4xx, malformed) do not.
    pub fn counts_against_endpoint(&self) -> bool {
        self.is_retryable()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::Connection(_) => "connection_error",
            TransportError::Remote { code, .. } if *code >= 500 => "remote_5xx",
            TransportError::Remote { .. } => "remote_4xx",
            TransportError::Malformed(_) => "malformed",
        }
    }
}

/// The payload of one logical call, shared by all its attempts.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub payload: Bytes,
    /// Free-form key/value metadata forwarded to the backend.
    pub metadata: BTreeMap<String, String>,
}

impl Call {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Capability to perform one call against one endpoint.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Send `call` to `endpoint`, giving up after `timeout`.
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        call: &Call,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Lightweight liveness check used by active health probing.
    async fn probe(&self, _endpoint: &Endpoint, _timeout: Duration) -> bool {
        true
    }

    /// Drop any per-endpoint state once the endpoint is deregistered.
    async fn release(&self, _endpoint: &EndpointId) {}

    /// Exchanges one endpoint can carry at once, when the transport itself
    /// serializes them. The concurrency gate caps endpoints to this bound.
    fn connection_limit(&self) -> Option<usize> {
        None
    }
}

/// Adapters indexed by transport kind.
#[derive(Clone, Default)]
pub struct Transports {
    adapters: HashMap<TransportKind, Arc<dyn TransportAdapter>>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    /// REST over reqwest and streams over WebSocket.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(TransportKind::Rest, Arc::new(HttpTransport::new()))
            .with(TransportKind::Stream, Arc::new(WebSocketTransport::new()))
    }

    pub fn with(mut self, kind: TransportKind, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (TransportKind, &Arc<dyn TransportAdapter>)> {
        self.adapters.iter().map(|(kind, adapter)| (*kind, adapter))
    }

    pub fn get(&self, kind: TransportKind) -> Option<&Arc<dyn TransportAdapter>> {
        self.adapters.get(&kind)
    }
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transports")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Connection("refused".into()).is_retryable());
        assert!(TransportError::Remote { code: 503, message: String::new() }.is_retryable());
        assert!(!TransportError::Remote { code: 400, message: String::new() }.is_retryable());
        assert!(!TransportError::Malformed("bad".into()).is_retryable());
    }

    #[test]
    fn test_client_errors_do_not_count_against_endpoint() {
        let err = TransportError::Remote { code: 404, message: "missing".into() };
        assert!(!err.counts_against_endpoint());
        assert_eq!(err.kind(), "remote_4xx");
    }
}
