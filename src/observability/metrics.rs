//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_calls_total` (counter): logical calls by model, outcome
//! - `router_call_duration_seconds` (histogram): logical call latency
//! - `router_cache_lookups_total` (counter): cache hits and misses
//! - `router_cache_entries` (gauge): cached responses
//! - `router_retries_total` (counter): retry attempts by model
//! - `router_circuit_transitions_total` (counter): breaker transitions
//! - `router_admission_rejected_total` (counter): `Overloaded` rejections
//! - `router_attempts_total` (counter): transport attempts by endpoint, result

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::observability::events::{EventKind, RouterEvent};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the end of a logical call.
pub fn record_call(model: &str, outcome: &'static str, start: Instant) {
    metrics::counter!(
        "router_calls_total",
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("router_call_duration_seconds", "model" => model.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("router_cache_entries").set(entries as f64);
}

pub fn record_event(event: &RouterEvent) {
    let model = event.model.clone();
    match &event.kind {
        EventKind::CacheHit => {
            metrics::counter!("router_cache_lookups_total", "model" => model, "result" => "hit")
                .increment(1);
        }
        EventKind::CacheMiss => {
            metrics::counter!("router_cache_lookups_total", "model" => model, "result" => "miss")
                .increment(1);
        }
        EventKind::RetryAttempt { .. } => {
            metrics::counter!("router_retries_total", "model" => model).increment(1);
        }
        EventKind::CircuitTransition { to, .. } => {
            let endpoint = event.endpoint.as_ref().map(ToString::to_string).unwrap_or_default();
            metrics::counter!(
                "router_circuit_transitions_total",
                "endpoint" => endpoint,
                "to" => to.to_string()
            )
            .increment(1);
        }
        EventKind::AdmissionRejected { scope } => {
            metrics::counter!(
                "router_admission_rejected_total",
                "model" => model,
                "scope" => scope.to_string()
            )
            .increment(1);
        }
        EventKind::AttemptSucceeded { .. } | EventKind::AttemptFailed { .. } => {
            let endpoint = event.endpoint.as_ref().map(ToString::to_string).unwrap_or_default();
            let result = match &event.kind {
                EventKind::AttemptFailed { error, .. } => *error,
                _ => "success",
            };
            metrics::counter!("router_attempts_total", "endpoint" => endpoint, "result" => result)
                .increment(1);
        }
    }
}
