//! Router error taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::config::TransportKind;
use crate::load_balancer::endpoint::EndpointId;
use crate::transport::TransportError;

/// Which admission bound rejected a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionScope {
    Global,
    Endpoint(EndpointId),
}

impl std::fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionScope::Global => write!(f, "global"),
            AdmissionScope::Endpoint(id) => write!(f, "endpoint {}", id),
        }
    }
}

/// Errors surfaced by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Every endpoint of the model is tripped, or none is registered.
    #[error("no healthy endpoint for model '{model}'")]
    NoHealthyEndpoint { model: String },

    /// A single endpoint refused the call because its circuit is open.
    #[error("circuit open for endpoint {0}")]
    CircuitOpen(EndpointId),

    /// An admission bound and its wait queue are both full.
    #[error("overloaded: {0} admission queue is full")]
    Overloaded(AdmissionScope),

    /// A non-retryable transport failure.
    #[error(transparent)]
    Transport(TransportError),

    /// All attempts failed; carries the last underlying failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: TransportError },

    /// The caller's time budget ran out.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    /// An endpoint uses a transport with no registered adapter.
    #[error("no transport adapter registered for {0}")]
    NoTransport(TransportKind),

    /// Endpoint definition could not be turned into an endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RouterError {
    /// Short machine-readable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::NoHealthyEndpoint { .. } => "no_healthy_endpoint",
            RouterError::CircuitOpen(_) => "circuit_open",
            RouterError::Overloaded(_) => "overloaded",
            RouterError::Transport(e) => e.kind(),
            RouterError::RetryExhausted { .. } => "retry_exhausted",
            RouterError::DeadlineExceeded(_) => "deadline_exceeded",
            RouterError::EndpointNotFound(_) => "endpoint_not_found",
            RouterError::NoTransport(_) => "no_transport",
            RouterError::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }
}
