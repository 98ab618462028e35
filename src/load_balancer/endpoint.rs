//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend instance of a logical model
//! - Track outstanding requests (for least-outstanding selection)
//! - Own the endpoint's circuit breaker
//! - Accumulate request statistics

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{CircuitBreakerConfig, EndpointConfig, TransportKind};
use crate::error::RouterError;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Identity of an endpoint: model name plus instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EndpointId {
    model: String,
    instance: String,
}

impl EndpointId {
    pub fn new(model: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instance: instance.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model, self.instance)
    }
}

/// Request counters for one endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_latency_ms: f64,
    pub average_latency_ms: f64,
}

impl EndpointStats {
    pub fn record(&self, latency: Duration, success: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total_ms = self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
        StatsSnapshot {
            request_count: requests,
            success_count: self.successes.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            total_latency_ms: total_ms,
            average_latency_ms: if requests > 0 { total_ms / requests as f64 } else { 0.0 },
        }
    }
}

/// A single backend instance.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    transport: TransportKind,
    address: Url,
    weight: u32,
    timeout: Duration,
    max_in_flight: Option<usize>,
    /// Requests selected for this endpoint and not yet finished.
    in_flight: AtomicUsize,
    breaker: CircuitBreaker,
    stats: EndpointStats,
}

impl Endpoint {
    pub fn new(
        id: EndpointId,
        transport: TransportKind,
        address: Url,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            id,
            transport,
            address,
            weight: 1,
            timeout: Duration::from_secs(10),
            max_in_flight: None,
            in_flight: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(breaker),
            stats: EndpointStats::default(),
        }
    }

    /// Build an endpoint from its configuration entry.
    pub fn from_config(
        config: &EndpointConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, RouterError> {
        let address = Url::parse(&config.url)
            .map_err(|e| RouterError::InvalidEndpoint(format!("{}: {}", config.url, e)))?;
        let mut endpoint = Self::new(
            EndpointId::new(&config.model, &config.name),
            config.transport,
            address,
            breaker.clone(),
        );
        endpoint.weight = config.weight;
        endpoint.timeout = config.timeout();
        endpoint.max_in_flight = config.max_in_flight;
        Ok(endpoint)
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_in_flight(&self) -> Option<usize> {
        self.max_in_flight
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    /// Get the current number of outstanding requests.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Count a request against this endpoint until the guard drops.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            endpoint: self.clone(),
        }
    }

    /// Whether this endpoint still matches its configuration entry.
    pub fn matches(&self, config: &EndpointConfig) -> bool {
        self.id.model == config.model
            && self.id.instance == config.name
            && self.transport == config.transport
            && Url::parse(&config.url).map_or(false, |url| url == self.address)
            && self.weight == config.weight
            && self.timeout == config.timeout()
            && self.max_in_flight == config.max_in_flight
    }
}

/// A RAII guard that manages the outstanding request count.
#[derive(Debug)]
pub struct InFlightGuard {
    endpoint: Arc<Endpoint>,
}

impl Deref for InFlightGuard {
    type Target = Arc<Endpoint>;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.endpoint.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
