//! Global and per-endpoint in-flight bounds.
//!
//! # Responsibilities
//! - Bound total in-flight calls across the router
//! - Bound in-flight attempts per endpoint (endpoint override or default)
//! - Queue callers on a saturated bound, reject once the queue is full
//! - Release permits on every exit path, including cancellation
//! - Cap endpoints whose transport multiplexes nothing (one exchange per
//!   connection) so callers queue here, under the deadline, rather than
//!   inside the transport where waiting would look like a slow endpoint

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{ConcurrencyConfig, TransportKind};
use crate::error::{AdmissionScope, RouterError};
use crate::load_balancer::endpoint::{Endpoint, EndpointId};
use crate::observability::{EventKind, RouterEvent, SharedSink};

/// One bound: a semaphore plus the number of callers queued on it.
#[derive(Debug)]
struct Limiter {
    sem: Arc<Semaphore>,
    capacity: usize,
    waiting: AtomicUsize,
}

impl Limiter {
    fn new(capacity: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: AtomicUsize::new(0),
        }
    }

    /// `None` when the queue is full.
    async fn acquire(&self, queue_depth: usize) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = self.sem.clone().try_acquire_owned() {
            return Some(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::AcqRel);
        let _waiting = WaitingGuard(&self.waiting);
        if queued >= queue_depth {
            return None;
        }
        // The semaphore is never closed.
        self.sem.clone().acquire_owned().await.ok()
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A permit handed out by the gate.
pub trait Permit: sealed::Sealed {}

mod sealed {
    pub trait Sealed {}
}

/// Held for the duration of a logical call.
#[derive(Debug)]
pub struct GlobalPermit {
    _permit: OwnedSemaphorePermit,
}

/// Held for the duration of one attempt against one endpoint.
#[derive(Debug)]
pub struct EndpointPermit {
    endpoint: EndpointId,
    _permit: OwnedSemaphorePermit,
}

impl sealed::Sealed for GlobalPermit {}
impl Permit for GlobalPermit {}
impl sealed::Sealed for EndpointPermit {}
impl Permit for EndpointPermit {}

impl EndpointPermit {
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }
}

/// Admission control for the router.
pub struct ConcurrencyGate {
    config: ConcurrencyConfig,
    global: Limiter,
    endpoints: DashMap<EndpointId, Arc<Limiter>>,
    transport_limits: HashMap<TransportKind, usize>,
    events: SharedSink,
}

impl ConcurrencyGate {
    pub fn new(config: ConcurrencyConfig, events: SharedSink) -> Self {
        Self {
            global: Limiter::new(config.global_max_in_flight),
            config,
            endpoints: DashMap::new(),
            transport_limits: HashMap::new(),
            events,
        }
    }

    /// Cap the per-endpoint bound of every endpoint using `kind`.
    pub fn with_transport_limit(mut self, kind: TransportKind, limit: usize) -> Self {
        self.transport_limits.insert(kind, limit.max(1));
        self
    }

    /// Take a slot under the global bound for a call to `model`.
    pub async fn admit(&self, model: &str) -> Result<GlobalPermit, RouterError> {
        match self.global.acquire(self.config.queue_depth).await {
            Some(permit) => Ok(GlobalPermit { _permit: permit }),
            None => Err(self.reject(model, None, AdmissionScope::Global)),
        }
    }

    /// Take a slot under `endpoint`'s own bound.
    pub async fn acquire(&self, endpoint: &Arc<Endpoint>) -> Result<EndpointPermit, RouterError> {
        let limiter = self.limiter(endpoint);
        match limiter.acquire(self.config.queue_depth).await {
            Some(permit) => Ok(EndpointPermit {
                endpoint: endpoint.id().clone(),
                _permit: permit,
            }),
            None => {
                let id = endpoint.id();
                Err(self.reject(id.model(), Some(id), AdmissionScope::Endpoint(id.clone())))
            }
        }
    }

    /// Give a permit back early. Dropping it has the same effect.
    pub fn release<P: Permit>(&self, permit: P) {
        drop(permit);
    }

    /// Drop the bound of a deregistered endpoint. Held permits stay valid.
    pub fn forget(&self, id: &EndpointId) {
        self.endpoints.remove(id);
    }

    pub fn available_global(&self) -> usize {
        self.global.sem.available_permits()
    }

    pub fn waiting_global(&self) -> usize {
        self.global.waiting.load(Ordering::Acquire)
    }

    pub fn available(&self, id: &EndpointId) -> Option<usize> {
        self.endpoints.get(id).map(|l| l.sem.available_permits())
    }

    pub fn waiting(&self, id: &EndpointId) -> usize {
        self.endpoints
            .get(id)
            .map_or(0, |l| l.waiting.load(Ordering::Acquire))
    }

    fn limiter(&self, endpoint: &Endpoint) -> Arc<Limiter> {
        let configured = endpoint
            .max_in_flight()
            .unwrap_or(self.config.per_endpoint_max_in_flight);
        let capacity = match self.transport_limits.get(&endpoint.transport()) {
            Some(&limit) => configured.min(limit),
            None => configured,
        };
        if let Some(existing) = self.endpoints.get(endpoint.id()) {
            if existing.capacity == capacity {
                return existing.clone();
            }
        }
        // First use, or the endpoint was re-registered with a new bound.
        self.endpoints
            .entry(endpoint.id().clone())
            .and_modify(|l| {
                if l.capacity != capacity {
                    *l = Arc::new(Limiter::new(capacity));
                }
            })
            .or_insert_with(|| Arc::new(Limiter::new(capacity)))
            .clone()
    }

    fn reject(&self, model: &str, endpoint: Option<&EndpointId>, scope: AdmissionScope) -> RouterError {
        self.events.emit(RouterEvent::new(
            EventKind::AdmissionRejected {
                scope: scope.clone(),
            },
            model,
            endpoint,
        ));
        RouterError::Overloaded(scope)
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("config", &self.config)
            .field("transport_limits", &self.transport_limits)
            .field("available_global", &self.available_global())
            .finish()
    }
}
