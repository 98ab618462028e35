//! Endpoint selection.

use std::sync::Arc;
use tokio::time::Instant;

use crate::error::RouterError;
use crate::load_balancer::endpoint::{Endpoint, EndpointId, InFlightGuard};
use crate::load_balancer::registry::Registry;
use crate::load_balancer::SelectionPolicy;
use crate::observability::{EventKind, RouterEvent, SharedSink};
use crate::resilience::circuit_breaker::{Admission, CircuitState, Transition};

/// Chooses an endpoint per attempt and hands out leases.
pub struct LoadBalancer {
    registry: Arc<Registry>,
    policy: Box<dyn SelectionPolicy>,
    events: SharedSink,
}

impl LoadBalancer {
    pub fn new(registry: Arc<Registry>, policy: Box<dyn SelectionPolicy>, events: SharedSink) -> Self {
        Self {
            registry,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &str {
        self.policy.name()
    }

    /// Whether any endpoint of `model` would be selectable at `at`.
    pub fn has_candidate(&self, model: &str, at: Instant) -> bool {
        self.registry
            .pool(model)
            .is_some_and(|pool| pool.endpoints().iter().any(|e| e.breaker().is_selectable(at)))
    }

    /// Select an endpoint for `model`.
    pub fn select(&self, model: &str) -> Result<Lease, RouterError> {
        self.select_with(model, &[], None)
    }

    /// Select an endpoint, avoiding `exclude` unless nothing else is healthy.
    /// `prefer` names an instance to try before the policy runs.
    pub fn select_with(
        &self,
        model: &str,
        exclude: &[EndpointId],
        prefer: Option<&str>,
    ) -> Result<Lease, RouterError> {
        let no_healthy = || RouterError::NoHealthyEndpoint {
            model: model.to_string(),
        };
        let pool = self.registry.pool(model).ok_or_else(no_healthy)?;

        let _selection = pool.lock_selection();
        let now = Instant::now();
        let endpoints = pool.endpoints();

        if let Some(name) = prefer {
            let preferred = endpoints
                .iter()
                .find(|e| e.id().instance() == name && !exclude.contains(e.id()));
            if let Some(endpoint) = preferred {
                match self.lease(model, endpoint, now) {
                    Ok(lease) => return Ok(lease),
                    Err(e) => tracing::debug!(error = %e, "Preferred endpoint unavailable"),
                }
            }
        }

        let mut candidates: Vec<Arc<Endpoint>> = endpoints
            .iter()
            .filter(|e| e.breaker().is_selectable(now))
            .cloned()
            .collect();

        if !exclude.is_empty() {
            let fresh: Vec<Arc<Endpoint>> = candidates
                .iter()
                .filter(|e| !exclude.contains(e.id()))
                .cloned()
                .collect();
            if !fresh.is_empty() {
                candidates = fresh;
            }
        }

        while let Some(index) = self.policy.next_endpoint(&candidates) {
            let endpoint = candidates.remove(index);
            match self.lease(model, &endpoint, now) {
                Ok(lease) => return Ok(lease),
                Err(e) => tracing::debug!(error = %e, "Candidate rejected, reselecting"),
            }
        }

        tracing::debug!(model, endpoint_count = endpoints.len(), "No healthy endpoints found");
        Err(no_healthy())
    }

    fn lease(&self, model: &str, endpoint: &Arc<Endpoint>, now: Instant) -> Result<Lease, RouterError> {
        let admission = endpoint
            .breaker()
            .admit(now)
            .map_err(|_| RouterError::CircuitOpen(endpoint.id().clone()))?;

        if admission == Admission::Trial {
            emit_transition(
                &self.events,
                model,
                endpoint.id(),
                Transition {
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen,
                },
            );
        }

        Ok(Lease {
            guard: endpoint.track(),
            admission,
            model: model.to_string(),
            events: self.events.clone(),
            settled: false,
        })
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("policy", &self.policy.name())
            .finish()
    }
}

fn emit_transition(events: &SharedSink, model: &str, id: &EndpointId, t: Transition) {
    events.emit(RouterEvent::new(
        EventKind::CircuitTransition { from: t.from, to: t.to },
        model,
        Some(id),
    ));
}

/// The right to send one attempt to one endpoint.
///
/// Counts as outstanding on the endpoint until dropped, and must be settled
/// with the attempt's outcome. An unsettled lease resolves a recovery trial
/// as failed.
pub struct Lease {
    guard: InFlightGuard,
    admission: Admission,
    model: String,
    events: SharedSink,
    settled: bool,
}

impl Lease {
    /// Claim the recovery trial of a tripped endpoint outside of selection.
    /// `None` unless the cool-down has elapsed and no trial is in flight.
    pub fn claim_trial(endpoint: &Arc<Endpoint>, events: SharedSink) -> Option<Self> {
        let admission = endpoint.breaker().admit_trial(Instant::now())?;
        let model = endpoint.id().model().to_string();
        emit_transition(
            &events,
            &model,
            endpoint.id(),
            Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
            },
        );
        Some(Self {
            guard: endpoint.track(),
            admission,
            model,
            events,
            settled: false,
        })
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.guard
    }

    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    /// Report that the endpoint answered.
    pub fn succeed(mut self) {
        self.settled = true;
        let transition = self
            .guard
            .breaker()
            .record_success(self.admission, Instant::now());
        self.report(transition);
    }

    /// Report a failure attributable to the endpoint.
    pub fn fail(mut self) {
        self.settled = true;
        let transition = self
            .guard
            .breaker()
            .record_failure(self.admission, Instant::now());
        self.report(transition);
    }

    fn report(&self, transition: Option<Transition>) {
        if let Some(t) = transition {
            emit_transition(&self.events, &self.model, self.guard.id(), t);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", self.guard.id())
            .field("admission", &self.admission)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.settled {
            let transition = self
                .guard
                .breaker()
                .abandon(self.admission, Instant::now());
            self.report(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, EndpointConfig, TransportKind};
    use crate::load_balancer::least_conn::LeastOutstanding;
    use crate::observability::{EventSink, TracingSink};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RouterEvent>>);

    impl EventSink for Recorder {
        fn emit(&self, event: RouterEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn registry(names: &[&str], threshold: u32) -> Arc<Registry> {
        let registry = Arc::new(Registry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cool_down_ms: 1_000,
            ..CircuitBreakerConfig::default()
        }));
        for (i, name) in names.iter().enumerate() {
            registry
                .register_config(&EndpointConfig {
                    name: name.to_string(),
                    model: "stt".into(),
                    url: format!("http://127.0.0.1:{}/", 9000 + i),
                    transport: TransportKind::Rest,
                    weight: 1,
                    timeout_ms: 1_000,
                    max_in_flight: None,
                })
                .unwrap();
        }
        registry
    }

    fn balancer(registry: Arc<Registry>) -> LoadBalancer {
        LoadBalancer::new(registry, Box::new(LeastOutstanding::new()), Arc::new(TracingSink))
    }

    #[test]
    fn test_unknown_model_has_no_healthy_endpoint() {
        let lb = balancer(registry(&["a"], 3));
        assert!(matches!(lb.select("tts"), Err(RouterError::NoHealthyEndpoint { .. })));
    }

    #[test]
    fn test_concurrent_leases_spread_evenly() {
        let lb = balancer(registry(&["a", "b", "c"], 3));
        let leases: Vec<Lease> = (0..7).map(|_| lb.select("stt").unwrap()).collect();

        let loads: Vec<usize> = lb.registry.list("stt").iter().map(|e| e.in_flight()).collect();
        let min = *loads.iter().min().unwrap();
        assert!(loads.iter().all(|&l| l <= min + 1), "loads: {:?}", loads);
        assert_eq!(loads.iter().sum::<usize>(), 7);

        drop(leases);
        assert!(lb.registry.list("stt").iter().all(|e| e.in_flight() == 0));
    }

    #[test]
    fn test_open_circuit_is_skipped() {
        let lb = balancer(registry(&["a", "b"], 3));
        for _ in 0..3 {
            let lease = lb.select_with("stt", &[], Some("a")).unwrap();
            assert_eq!(lease.endpoint().id().instance(), "a");
            lease.fail();
        }
        for _ in 0..5 {
            let lease = lb.select("stt").unwrap();
            assert_eq!(lease.endpoint().id().instance(), "b");
            lease.succeed();
        }
    }

    #[test]
    fn test_all_open_is_no_healthy_endpoint() {
        let lb = balancer(registry(&["a"], 1));
        lb.select("stt").unwrap().fail();
        assert!(matches!(lb.select("stt"), Err(RouterError::NoHealthyEndpoint { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_candidate_looks_ahead_to_cool_down() {
        let lb = balancer(registry(&["a"], 1));
        let now = Instant::now();
        assert!(lb.has_candidate("stt", now));
        assert!(!lb.has_candidate("tts", now));

        lb.select("stt").unwrap().fail();
        assert!(!lb.has_candidate("stt", now));
        assert!(!lb.has_candidate("stt", now + Duration::from_millis(999)));
        assert!(lb.has_candidate("stt", now + Duration::from_millis(1_000)));
    }

    #[test]
    fn test_exclusion_falls_back_when_only_choice() {
        let lb = balancer(registry(&["a", "b"], 3));
        let a = EndpointId::new("stt", "a");
        let b = EndpointId::new("stt", "b");

        let lease = lb.select_with("stt", &[a.clone()], None).unwrap();
        assert_eq!(lease.endpoint().id(), &b);
        drop(lease);

        let lease = lb.select_with("stt", &[a.clone(), b.clone()], None).unwrap();
        assert!(lease.endpoint().id() == &a || lease.endpoint().id() == &b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_cool_down() {
        let recorder = Arc::new(Recorder::default());
        let lb = LoadBalancer::new(
            registry(&["a"], 1),
            Box::new(LeastOutstanding::new()),
            recorder.clone(),
        );
        lb.select("stt").unwrap().fail();
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = lb.select("stt").unwrap();
        assert!(trial.is_trial());
        assert!(matches!(lb.select("stt"), Err(RouterError::NoHealthyEndpoint { .. })));

        trial.succeed();
        assert!(!lb.select("stt").unwrap().is_trial());

        let transitions: Vec<(CircuitState, CircuitState)> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::CircuitTransition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let lb = balancer(registry(&["a"], 1));
        lb.select("stt").unwrap().fail();
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = lb.select("stt").unwrap();
        drop(trial);
        let endpoint = lb.registry.list("stt").remove(0);
        assert_eq!(endpoint.breaker().state(), CircuitState::Open);
    }
}
