//! Structured router events.
//!
//! Every event carries a kind, the logical model, the endpoint involved (if
//! any) and a wall-clock timestamp. Sinks are supplied by the embedder; the
//! default sink logs through `tracing` and records `metrics` counters.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::AdmissionScope;
use crate::load_balancer::endpoint::EndpointId;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitState;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    CacheHit,
    CacheMiss,
    /// A retry is about to be issued after `delay`.
    RetryAttempt { attempt: u32, delay: Duration },
    CircuitTransition { from: CircuitState, to: CircuitState },
    AdmissionRejected { scope: AdmissionScope },
    AttemptSucceeded { latency: Duration },
    AttemptFailed { error: &'static str, latency: Duration },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CacheHit => "cache_hit",
            EventKind::CacheMiss => "cache_miss",
            EventKind::RetryAttempt { .. } => "retry_attempt",
            EventKind::CircuitTransition { .. } => "circuit_transition",
            EventKind::AdmissionRejected { .. } => "admission_rejected",
            EventKind::AttemptSucceeded { .. } => "attempt_succeeded",
            EventKind::AttemptFailed { .. } => "attempt_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterEvent {
    pub kind: EventKind,
    pub model: String,
    pub endpoint: Option<EndpointId>,
    pub at: SystemTime,
}

impl RouterEvent {
    pub fn new(kind: EventKind, model: impl Into<String>, endpoint: Option<&EndpointId>) -> Self {
        Self {
            kind,
            model: model.into(),
            endpoint: endpoint.cloned(),
            at: SystemTime::now(),
        }
    }
}

/// Consumer of router events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RouterEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Default sink: structured log line plus metric update.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RouterEvent) {
        let endpoint = event
            .endpoint
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        match &event.kind {
            EventKind::CircuitTransition { from, to } => {
                tracing::warn!(model = %event.model, endpoint = %endpoint, %from, %to, "Circuit breaker transition");
            }
            EventKind::AdmissionRejected { scope } => {
                tracing::warn!(model = %event.model, %scope, "Admission rejected");
            }
            EventKind::RetryAttempt { attempt, delay } => {
                tracing::info!(model = %event.model, attempt, delay = ?delay, "Retrying request");
            }
            EventKind::AttemptFailed { error, latency } => {
                tracing::warn!(model = %event.model, endpoint = %endpoint, error, latency = ?latency, "Attempt failed");
            }
            kind => {
                tracing::debug!(model = %event.model, endpoint = %endpoint, event = kind.name(), "Router event");
            }
        }

        metrics::record_event(&event);
    }
}

/// Forwards every event to several sinks.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: RouterEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RouterEvent>>);

    impl EventSink for Recorder {
        fn emit(&self, event: RouterEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_fanout_delivers_to_all() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);

        let id = EndpointId::new("stt", "primary");
        fanout.emit(RouterEvent::new(EventKind::CacheHit, "stt", Some(&id)));

        assert_eq!(a.0.lock().unwrap().len(), 1);
        let events = b.0.lock().unwrap();
        assert_eq!(events[0].kind.name(), "cache_hit");
        assert_eq!(events[0].endpoint.as_ref(), Some(&id));
    }
}
