//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the inference router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Backend model endpoints.
    pub endpoints: Vec<EndpointConfig>,

    /// Endpoint selection policy.
    pub balancer: BalancerConfig,

    /// Per-endpoint circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Admission bounds.
    pub concurrency: ConcurrencyConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Active health probing of tripped endpoints.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only admin surface.
    pub admin: AdminConfig,
}

/// Transport used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Synchronous request/response over HTTP.
    #[serde(alias = "http")]
    Rest,
    /// Persistent bidirectional socket (WebSocket).
    #[serde(alias = "websocket")]
    Stream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Rest => write!(f, "rest"),
            TransportKind::Stream => write!(f, "stream"),
        }
    }
}

/// A single backend instance of a logical model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Instance name, unique within its model.
    pub name: String,

    /// Logical model this instance serves (e.g. "stt").
    pub model: String,

    /// Endpoint URL (http(s):// or ws(s)://).
    pub url: String,

    /// Transport kind.
    #[serde(rename = "type")]
    pub transport: TransportKind,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Upper bound for a single call to this endpoint in milliseconds.
    #[serde(default = "default_endpoint_timeout_ms")]
    pub timeout_ms: u64,

    /// Override for the per-endpoint in-flight bound.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

fn default_weight() -> u32 {
    1
}

fn default_endpoint_timeout_ms() -> u64 {
    10_000
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Selection policy for choosing among healthy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingPolicy {
    /// Fewest outstanding requests, ties rotated round-robin.
    #[default]
    LeastOutstanding,
    /// Plain rotation.
    RoundRobin,
    /// Random choice proportional to endpoint weight.
    Weighted,
    /// Fewest outstanding requests, ties go to the first endpoint.
    LeastConnections,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub policy: BalancingPolicy,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the circuit.
    pub failure_threshold: u32,

    /// Trailing window for counting failures, in milliseconds.
    pub window_ms: u64,

    /// Time an open circuit waits before admitting a trial, in milliseconds.
    pub cool_down_ms: u64,

    /// Multiplier applied to the cool-down on each repeated trip.
    pub cool_down_multiplier: f64,

    /// Upper bound for the multiplied cool-down, in milliseconds.
    pub max_cool_down_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cool_down_ms: 30_000,
            cool_down_multiplier: 1.0,
            max_cool_down_ms: 300_000,
        }
    }
}

/// How the caller-supplied timeout is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineScope {
    /// The timeout bounds the whole logical call, backoff included.
    #[default]
    Call,
    /// The timeout bounds each transport attempt independently.
    Attempt,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum transport attempts per logical call (including the first).
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied per further retry.
    pub multiplier: f64,

    /// Upper bound for random jitter added to each delay, in milliseconds.
    pub jitter_max_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,

    /// Whether the caller timeout bounds the call or each attempt.
    pub deadline_scope: DeadlineScope,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            jitter_max_ms: 50,
            max_delay_ms: 2000,
            deadline_scope: DeadlineScope::Call,
        }
    }
}

/// Admission bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum logical calls in flight across the router.
    pub global_max_in_flight: usize,

    /// Default maximum attempts in flight per endpoint.
    pub per_endpoint_max_in_flight: usize,

    /// Callers allowed to wait on a saturated bound before `Overloaded`.
    /// Zero rejects immediately.
    pub queue_depth: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_max_in_flight: 1024,
            per_endpoint_max_in_flight: 64,
            queue_depth: 256,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// TTL used when a request does not carry its own, in seconds.
    pub default_ttl_secs: u64,

    /// Capacity bound; least recently used entries are evicted beyond it.
    pub max_entries: Option<usize>,

    /// Interval of the background expiry sweep, disabled when unset.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            max_entries: Some(10_000),
            sweep_interval_secs: Some(60),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout applied when the caller does not supply one, in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 30_000 }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active probing of endpoints whose cool-down elapsed.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin server.
    pub enabled: bool,

    /// Admin server bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
