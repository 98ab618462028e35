//! Router façade.
//!
//! # Responsibilities
//! - Own the registry, balancer, gate, retry controller and cache
//! - Run a logical call: cache → admission → retries → cache population
//! - Manage the endpoint pool at runtime
//! - Expose health and usage snapshots
//!
//! # Design Decisions
//! - A cache hit skips admission and selection entirely
//! - The global permit is taken once per call; endpoint permits per attempt
//! - Every call gets a UUID so its log lines can be correlated

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStats, Fingerprint, ResponseCache};
use crate::concurrency::ConcurrencyGate;
use crate::config::{EndpointConfig, RouterConfig, TransportKind};
use crate::error::RouterError;
use crate::health::HealthMonitor;
use crate::load_balancer::endpoint::{EndpointId, StatsSnapshot};
use crate::load_balancer::{policy_for, LoadBalancer, Registry, SyncReport};
use crate::observability::{metrics, EventKind, RouterEvent, SharedSink, TracingSink};
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::{Deadline, RetryController};
use crate::routing::{Response, SubmitOptions};
use crate::transport::{Call, Transports};

/// Health and load of one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub id: EndpointId,
    pub transport: TransportKind,
    pub address: String,
    pub weight: u32,
    pub in_flight: usize,
    pub available_permits: Option<usize>,
    pub breaker: BreakerSnapshot,
    pub stats: StatsSnapshot,
}

/// Router-wide view.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub models: Vec<String>,
    pub endpoints: usize,
    pub policy: String,
    pub available_global: usize,
    pub waiting_global: usize,
    pub cache: CacheStats,
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    config: RouterConfig,
    transports: Option<Transports>,
    events: Option<SharedSink>,
}

impl RouterBuilder {
    /// Replace the default REST and WebSocket adapters.
    pub fn transports(mut self, transports: Transports) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Replace the default tracing + metrics event sink.
    pub fn events(mut self, events: SharedSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the router and register the configured endpoints.
    pub fn build(self) -> Result<Router, RouterError> {
        let config = self.config;
        let transports = self.transports.unwrap_or_else(Transports::with_defaults);
        let events = self.events.unwrap_or_else(|| Arc::new(TracingSink));

        let registry = Arc::new(Registry::new(config.circuit_breaker.clone()));
        let balancer = Arc::new(LoadBalancer::new(
            registry.clone(),
            policy_for(config.balancer.policy),
            events.clone(),
        ));
        let gate = transports
            .iter()
            .filter_map(|(kind, adapter)| adapter.connection_limit().map(|limit| (kind, limit)))
            .fold(
                ConcurrencyGate::new(config.concurrency.clone(), events.clone()),
                |gate, (kind, limit)| gate.with_transport_limit(kind, limit),
            );
        let gate = Arc::new(gate);
        let retry = RetryController::new(
            &config.retries,
            balancer.clone(),
            gate.clone(),
            transports.clone(),
            events.clone(),
        );
        let cache = Arc::new(ResponseCache::from_config(&config.cache));

        let router = Router {
            registry,
            balancer,
            gate,
            retry,
            cache,
            transports,
            events,
            config,
        };

        for endpoint in &router.config.endpoints {
            router.check_transport(endpoint.transport)?;
            router.registry.register_config(endpoint)?;
        }

        tracing::info!(
            endpoints = router.registry.len(),
            models = router.registry.models().len(),
            policy = router.balancer.policy(),
            "Router initialized"
        );
        Ok(router)
    }
}

/// Routes inference calls to model endpoints.
pub struct Router {
    config: RouterConfig,
    registry: Arc<Registry>,
    balancer: Arc<LoadBalancer>,
    gate: Arc<ConcurrencyGate>,
    retry: RetryController,
    cache: Arc<ResponseCache>,
    transports: Transports,
    events: SharedSink,
}

impl Router {
    pub fn builder(config: RouterConfig) -> RouterBuilder {
        RouterBuilder {
            config,
            transports: None,
            events: None,
        }
    }

    /// Router with the default adapters and event sink.
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        Self::builder(config).build()
    }

    /// Run one logical call against `model`.
    pub async fn submit(
        &self,
        model: &str,
        payload: impl Into<Bytes>,
        opts: SubmitOptions,
    ) -> Result<Response, RouterError> {
        let call_id = Uuid::new_v4();
        let span = tracing::info_span!("submit", %call_id, model);
        let call = Call {
            payload: payload.into(),
            metadata: opts.metadata.clone(),
        };
        self.run(model, call, opts).instrument(span).await
    }

    async fn run(&self, model: &str, call: Call, opts: SubmitOptions) -> Result<Response, RouterError> {
        let start = std::time::Instant::now();

        let fingerprint = (opts.cacheable && self.config.cache.enabled)
            .then(|| Fingerprint::compute(model, &call.payload, &call.metadata));

        if let Some(fingerprint) = &fingerprint {
            if let Some(hit) = self.cache.get(fingerprint) {
                self.emit(EventKind::CacheHit, model);
                tracing::debug!(%fingerprint, "Cache hit");
                metrics::record_call(model, "cache_hit", start);
                return Ok(hit);
            }
            self.emit(EventKind::CacheMiss, model);
        }

        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_millis(self.config.timeouts.request_ms));
        let deadline = Deadline::new(self.config.retries.deadline_scope, timeout);

        let result = self.dispatch(model, &call, &deadline, opts.prefer.as_deref()).await;

        match &result {
            Ok(response) => {
                if let Some(fingerprint) = fingerprint {
                    self.cache.put(fingerprint, response.clone(), opts.ttl);
                }
                tracing::debug!(endpoint = %response.endpoint, elapsed = ?start.elapsed(), "Call succeeded");
                metrics::record_call(model, "success", start);
            }
            Err(e) => {
                tracing::warn!(error = %e, elapsed = ?start.elapsed(), "Call failed");
                metrics::record_call(model, e.kind(), start);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        model: &str,
        call: &Call,
        deadline: &Deadline,
        prefer: Option<&str>,
    ) -> Result<Response, RouterError> {
        let limit = deadline.wait_limit(tokio::time::Instant::now());
        let _permit = tokio::time::timeout_at(limit, self.gate.admit(model))
            .await
            .map_err(|_| RouterError::DeadlineExceeded(deadline.timeout()))??;
        self.retry.execute(model, call, deadline, prefer).await
    }

    /// Add an endpoint. Registering an existing identity is a no-op.
    pub fn register_endpoint(&self, config: &EndpointConfig) -> Result<EndpointId, RouterError> {
        self.check_transport(config.transport)?;
        Ok(self.registry.register_config(config)?.id().clone())
    }

    /// Remove an endpoint. Calls already using it finish normally.
    pub async fn deregister_endpoint(&self, id: &EndpointId) -> Result<(), RouterError> {
        let endpoint = self.registry.deregister(id)?;
        self.release(id, endpoint.transport()).await;
        Ok(())
    }

    /// Reconcile the pool against a reloaded endpoint list.
    pub async fn sync_endpoints(&self, configs: &[EndpointConfig]) -> Result<SyncReport, RouterError> {
        for config in configs {
            self.check_transport(config.transport)?;
        }
        let before: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .map(|e| (e.id().clone(), e.transport()))
            .collect();

        let report = self.registry.sync(configs)?;

        for (id, transport) in before {
            if report.removed.contains(&id) || report.replaced.contains(&id) {
                self.release(&id, transport).await;
            }
        }
        tracing::info!(
            added = report.added.len(),
            removed = report.removed.len(),
            replaced = report.replaced.len(),
            "Endpoints reconciled"
        );
        Ok(report)
    }

    async fn release(&self, id: &EndpointId, transport: TransportKind) {
        self.gate.forget(id);
        if let Some(adapter) = self.transports.get(transport) {
            adapter.release(id).await;
        }
    }

    fn check_transport(&self, kind: TransportKind) -> Result<(), RouterError> {
        match self.transports.get(kind) {
            Some(_) => Ok(()),
            None => Err(RouterError::NoTransport(kind)),
        }
    }

    fn emit(&self, kind: EventKind, model: &str) {
        self.events.emit(RouterEvent::new(kind, model, None));
    }

    /// Breaker state and load of every endpoint.
    pub fn health_snapshot(&self) -> Vec<EndpointStatus> {
        let now = tokio::time::Instant::now();
        self.registry
            .all()
            .into_iter()
            .map(|e| EndpointStatus {
                id: e.id().clone(),
                transport: e.transport(),
                address: e.address().to_string(),
                weight: e.weight(),
                in_flight: e.in_flight(),
                available_permits: self.gate.available(e.id()),
                breaker: e.breaker().snapshot(now),
                stats: e.stats().snapshot(),
            })
            .collect()
    }

    /// Request counters of every endpoint.
    pub fn endpoint_stats(&self) -> Vec<(EndpointId, StatsSnapshot)> {
        self.registry
            .all()
            .into_iter()
            .map(|e| (e.id().clone(), e.stats().snapshot()))
            .collect()
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            models: self.registry.models(),
            endpoints: self.registry.len(),
            policy: self.balancer.policy().to_string(),
            available_global: self.gate.available_global(),
            waiting_global: self.gate.waiting_global(),
            cache: self.cache.stats(),
        }
    }

    /// Active prober for tripped endpoints, sharing this router's pool.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.registry.clone(),
            self.transports.clone(),
            self.events.clone(),
            self.config.health_check.clone(),
        )
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("endpoints", &self.registry.len())
            .field("balancer", &self.balancer)
            .field("transports", &self.transports)
            .finish()
    }
}
