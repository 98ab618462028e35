//! Retry logic.
//!
//! # Responsibilities
//! - Run the attempts of one logical call
//! - Re-select an endpoint per attempt, avoiding endpoints already tried
//! - Hold the per-endpoint permit for the duration of each attempt
//! - Report every attempt outcome to the endpoint's circuit breaker
//! - Delay retries with exponential backoff + jitter, within the deadline
//!
//! # Design Decisions
//! - Timeouts, connection errors and 5xx are retryable; 4xx and malformed
//!   requests are returned at once
//! - Admission and health failures surface at once; retrying into a
//!   saturated or dead pool only adds load
//! - An attempt cut short by the caller's deadline is not held against the
//!   endpoint

use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;

use crate::concurrency::ConcurrencyGate;
use crate::config::RetryConfig;
use crate::error::RouterError;
use crate::load_balancer::endpoint::EndpointId;
use crate::load_balancer::{Lease, LoadBalancer};
use crate::observability::{EventKind, RouterEvent, SharedSink};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::timeouts::Deadline;
use crate::routing::Response;
use crate::transport::{Call, TransportError, Transports};

/// Progress of one logical call.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempts: u32,
    pub started: Instant,
    pub last_error: Option<TransportError>,
}

impl AttemptRecord {
    fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
            last_error: None,
        }
    }
}

/// Result of a single attempt.
enum Outcome {
    Success(Bytes),
    Failed(TransportError),
    DeadlineReached,
}

/// Runs logical calls with bounded retries.
pub struct RetryController {
    balancer: Arc<LoadBalancer>,
    gate: Arc<ConcurrencyGate>,
    transports: Transports,
    events: SharedSink,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl RetryController {
    pub fn new(
        config: &RetryConfig,
        balancer: Arc<LoadBalancer>,
        gate: Arc<ConcurrencyGate>,
        transports: Transports,
        events: SharedSink,
    ) -> Self {
        Self {
            balancer,
            gate,
            transports,
            events,
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffPolicy::from_config(config),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Execute `call` against `model` until it succeeds, fails for good or
    /// runs out of attempts or time.
    pub async fn execute(
        &self,
        model: &str,
        call: &Call,
        deadline: &Deadline,
        prefer: Option<&str>,
    ) -> Result<Response, RouterError> {
        let mut record = AttemptRecord::new();
        let mut tried: Vec<EndpointId> = Vec::new();

        loop {
            let attempt = record.attempts + 1;

            if attempt > 1 {
                let delay = self.backoff.delay(attempt);
                // Sleeping only helps if someone can take the retry afterwards.
                if !self.balancer.has_candidate(model, Instant::now() + delay) {
                    return Err(self.exhausted(model, record));
                }
                if deadline.would_expire_after(delay, Instant::now()) {
                    tracing::debug!(model, attempt, delay = ?delay, "Backoff would cross deadline");
                    return Err(RouterError::DeadlineExceeded(deadline.timeout()));
                }
                self.events.emit(RouterEvent::new(
                    EventKind::RetryAttempt { attempt, delay },
                    model,
                    tried.last(),
                ));
                tokio::time::sleep(delay).await;
            }

            if deadline.is_expired(Instant::now()) {
                return Err(RouterError::DeadlineExceeded(deadline.timeout()));
            }

            // The preference applies to the first attempt only.
            let prefer = if attempt == 1 { prefer } else { None };
            let lease = match self.balancer.select_with(model, &tried, prefer) {
                Ok(lease) => lease,
                Err(RouterError::NoHealthyEndpoint { .. }) if record.last_error.is_some() => {
                    return Err(self.exhausted(model, record));
                }
                Err(e) => return Err(e),
            };
            let id = lease.endpoint().id().clone();
            record.attempts = attempt;

            match self.attempt(model, call, lease, deadline, attempt).await? {
                Outcome::Success(body) => return Ok(Response::new(body, id)),
                Outcome::DeadlineReached => {
                    return Err(RouterError::DeadlineExceeded(deadline.timeout()));
                }
                Outcome::Failed(error) if !error.is_retryable() => {
                    return Err(RouterError::Transport(error));
                }
                Outcome::Failed(error) => {
                    if !tried.contains(&id) {
                        tried.push(id);
                    }
                    record.last_error = Some(error);
                    if attempt >= self.max_attempts {
                        return Err(self.exhausted(model, record));
                    }
                }
            }
        }
    }

    /// Give up on a call, surfacing the last transport failure.
    fn exhausted(&self, model: &str, record: AttemptRecord) -> RouterError {
        match record.last_error {
            Some(last) => {
                tracing::warn!(
                    model,
                    attempts = record.attempts,
                    elapsed = ?record.started.elapsed(),
                    error = %last,
                    "Retries exhausted"
                );
                RouterError::RetryExhausted {
                    attempts: record.attempts,
                    last,
                }
            }
            None => RouterError::NoHealthyEndpoint {
                model: model.to_string(),
            },
        }
    }

    /// One transport exchange with a leased endpoint.
    async fn attempt(
        &self,
        model: &str,
        call: &Call,
        lease: Lease,
        deadline: &Deadline,
        attempt: u32,
    ) -> Result<Outcome, RouterError> {
        let endpoint = lease.endpoint().clone();
        let adapter = self
            .transports
            .get(endpoint.transport())
            .ok_or(RouterError::NoTransport(endpoint.transport()))?;

        let limit = deadline.wait_limit(Instant::now());
        let permit = match tokio::time::timeout_at(limit, self.gate.acquire(&endpoint)).await {
            Ok(permit) => permit?,
            Err(_) => return Ok(Outcome::DeadlineReached),
        };

        let start = Instant::now();
        let timeout = deadline.attempt_timeout(endpoint.timeout(), start);
        // The attempt was shortened by the caller's deadline rather than the
        // endpoint's own timeout.
        let clipped = timeout < endpoint.timeout();

        tracing::debug!(model, endpoint = %endpoint.id(), attempt, timeout = ?timeout, "Dispatching attempt");
        let result = match tokio::time::timeout(timeout, adapter.invoke(&endpoint, call, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        let latency = start.elapsed();
        drop(permit);

        match result {
            Ok(body) => {
                endpoint.stats().record(latency, true);
                lease.succeed();
                self.events.emit(RouterEvent::new(
                    EventKind::AttemptSucceeded { latency },
                    model,
                    Some(endpoint.id()),
                ));
                Ok(Outcome::Success(body))
            }
            Err(TransportError::Timeout) if clipped && deadline.is_expired(Instant::now()) => {
                endpoint.stats().record(latency, false);
                drop(lease);
                Ok(Outcome::DeadlineReached)
            }
            Err(error) => {
                endpoint.stats().record(latency, false);
                if error.counts_against_endpoint() {
                    lease.fail();
                } else {
                    lease.succeed();
                }
                self.events.emit(RouterEvent::new(
                    EventKind::AttemptFailed {
                        error: error.kind(),
                        latency,
                    },
                    model,
                    Some(endpoint.id()),
                ));
                Ok(Outcome::Failed(error))
            }
        }
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}
