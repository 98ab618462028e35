//! Endpoint registry.
//!
//! # Responsibilities
//! - Hold the endpoints of every logical model
//! - Register/deregister endpoints (idempotent by identity)
//! - Reconcile the pool against a reloaded configuration
//!
//! # Design Decisions
//! - Each model's endpoint list is an `ArcSwap` snapshot: dispatch reads
//!   never take a lock, registration swaps in a new list
//! - Runtime state (breaker, counters) lives on the `Endpoint` and survives
//!   reconciliation when the endpoint definition is unchanged

use arc_swap::{ArcSwap, Guard};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{CircuitBreakerConfig, EndpointConfig};
use crate::error::RouterError;
use crate::load_balancer::endpoint::{Endpoint, EndpointId};

/// Endpoints of one logical model.
#[derive(Debug, Default)]
pub struct ModelPool {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    /// Serializes selection so reading and bumping in-flight counters is atomic.
    selection: Mutex<()>,
}

impl ModelPool {
    pub fn endpoints(&self) -> Guard<Arc<Vec<Arc<Endpoint>>>> {
        self.endpoints.load()
    }

    pub(crate) fn lock_selection(&self) -> MutexGuard<'_, ()> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, endpoint: Arc<Endpoint>) {
        self.endpoints.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(endpoint.clone());
            next
        });
    }

    fn remove(&self, id: &EndpointId) {
        self.endpoints.rcu(|current| {
            current
                .iter()
                .filter(|e| e.id() != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Outcome of reconciling against a configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<EndpointId>,
    pub removed: Vec<EndpointId>,
    pub replaced: Vec<EndpointId>,
}

/// All registered endpoints, grouped by model.
#[derive(Debug)]
pub struct Registry {
    pools: DashMap<String, Arc<ModelPool>>,
    index: DashMap<EndpointId, Arc<Endpoint>>,
    breaker: CircuitBreakerConfig,
}

impl Registry {
    /// Create an empty registry. `breaker` configures endpoints built from config.
    pub fn new(breaker: CircuitBreakerConfig) -> Self {
        Self {
            pools: DashMap::new(),
            index: DashMap::new(),
            breaker,
        }
    }

    /// Register an endpoint built from configuration.
    pub fn register_config(&self, config: &EndpointConfig) -> Result<Arc<Endpoint>, RouterError> {
        let id = EndpointId::new(&config.model, &config.name);
        if let Some(existing) = self.index.get(&id) {
            return Ok(existing.clone());
        }
        let endpoint = Endpoint::from_config(config, &self.breaker)?;
        Ok(self.register(endpoint))
    }

    /// Register an endpoint. If one with the same identity exists, it is
    /// returned unchanged and `endpoint` is discarded.
    pub fn register(&self, endpoint: Endpoint) -> Arc<Endpoint> {
        match self.index.entry(endpoint.id().clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let endpoint = Arc::new(endpoint);
                let pool = self
                    .pools
                    .entry(endpoint.id().model().to_string())
                    .or_default()
                    .clone();
                pool.add(endpoint.clone());
                slot.insert(endpoint.clone());
                tracing::info!(
                    endpoint = %endpoint.id(),
                    transport = %endpoint.transport(),
                    address = %endpoint.address(),
                    "Endpoint registered"
                );
                endpoint
            }
        }
    }

    /// Remove an endpoint. In-flight calls holding it finish normally.
    pub fn deregister(&self, id: &EndpointId) -> Result<Arc<Endpoint>, RouterError> {
        let (_, endpoint) = self
            .index
            .remove(id)
            .ok_or_else(|| RouterError::EndpointNotFound(id.clone()))?;
        if let Some(pool) = self.pools.get(id.model()) {
            pool.remove(id);
        }
        tracing::info!(endpoint = %id, "Endpoint deregistered");
        Ok(endpoint)
    }

    pub fn get(&self, id: &EndpointId) -> Result<Arc<Endpoint>, RouterError> {
        self.index
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| RouterError::EndpointNotFound(id.clone()))
    }

    /// Endpoints registered for `model`, in registration order.
    pub fn list(&self, model: &str) -> Vec<Arc<Endpoint>> {
        self.pools
            .get(model)
            .map(|pool| pool.endpoints().to_vec())
            .unwrap_or_default()
    }

    pub fn pool(&self, model: &str) -> Option<Arc<ModelPool>> {
        self.pools.get(model).map(|p| p.clone())
    }

    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .pools
            .iter()
            .filter(|p| !p.value().endpoints().is_empty())
            .map(|p| p.key().clone())
            .collect();
        models.sort();
        models
    }

    /// Return a list of all endpoints (for health checking and reporting).
    pub fn all(&self) -> Vec<Arc<Endpoint>> {
        let mut all: Vec<Arc<Endpoint>> = self.index.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Make the registered set match `configs`: new identities are added,
    /// missing ones removed, changed definitions replaced.
    pub fn sync(&self, configs: &[EndpointConfig]) -> Result<SyncReport, RouterError> {
        let mut report = SyncReport::default();
        let desired: HashSet<EndpointId> = configs
            .iter()
            .map(|c| EndpointId::new(&c.model, &c.name))
            .collect();

        for endpoint in self.all() {
            if !desired.contains(endpoint.id()) {
                self.deregister(endpoint.id())?;
                report.removed.push(endpoint.id().clone());
            }
        }

        for config in configs {
            let id = EndpointId::new(&config.model, &config.name);
            match self.get(&id) {
                Ok(existing) if existing.matches(config) => {}
                Ok(_) => {
                    let replacement = Endpoint::from_config(config, &self.breaker)?;
                    self.deregister(&id)?;
                    self.register(replacement);
                    report.replaced.push(id);
                }
                Err(_) => {
                    self.register_config(config)?;
                    report.added.push(id);
                }
            }
        }

        Ok(report)
    }
}
