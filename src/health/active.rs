//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe endpoints whose circuit is waiting for a trial
//! - Resolve the trial with the probe result

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::{Lease, Registry};
use crate::observability::SharedSink;
use crate::transport::Transports;

pub struct HealthMonitor {
    registry: Arc<Registry>,
    transports: Transports,
    events: SharedSink,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<Registry>,
        transports: Transports,
        events: SharedSink,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            transports,
            events,
            config,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every endpoint that is due a recovery trial. Returns how many
    /// were probed.
    pub async fn check_all(&self) -> usize {
        let probes: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter_map(|endpoint| {
                Lease::claim_trial(&endpoint, self.events.clone()).map(|lease| self.probe(endpoint, lease))
            })
            .collect();
        let count = probes.len();
        join_all(probes).await;
        count
    }

    async fn probe(&self, endpoint: Arc<Endpoint>, lease: Lease) {
        let Some(adapter) = self.transports.get(endpoint.transport()) else {
            tracing::error!(endpoint = %endpoint.id(), transport = %endpoint.transport(), "No adapter to probe endpoint");
            return;
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let healthy = match time::timeout(timeout, adapter.probe(&endpoint, timeout)).await {
            Ok(healthy) => healthy,
            Err(_) => false,
        };

        if healthy {
            tracing::info!(endpoint = %endpoint.id(), "Health probe succeeded, closing circuit");
            lease.succeed();
        } else {
            tracing::warn!(endpoint = %endpoint.id(), "Health probe failed");
            lease.fail();
        }
    }
}
