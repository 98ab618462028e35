//! Startup orchestration.
//!
//! # Responsibilities
//! - Start background tasks (health monitor, cache sweeper, config reload,
//!   admin server, metrics exporter)
//! - Hand back their join handles so shutdown can wait for them
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every task subscribes to the same `Shutdown` broadcast
//! - A config watcher that cannot start is logged, not fatal

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{ConfigWatcher, RouterConfig};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::Router;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid {field} address '{value}': {source}")]
    Address {
        field: &'static str,
        value: String,
        source: std::net::AddrParseError,
    },
}

/// Running background tasks.
pub struct Services {
    handles: Vec<JoinHandle<()>>,
    /// Kept alive for as long as reloads should be observed.
    _watcher: Option<notify::RecommendedWatcher>,
}

impl Services {
    /// Start every background task enabled in `config`.
    pub fn start(
        router: Arc<Router>,
        config: &RouterConfig,
        config_path: Option<&Path>,
        shutdown: &Shutdown,
    ) -> Result<Self, StartupError> {
        let mut handles = Vec::new();

        if config.observability.metrics_enabled {
            let addr = parse_addr("observability.metrics_address", &config.observability.metrics_address)?;
            metrics::init_metrics(addr);
        }

        let admin_addr = if config.admin.enabled {
            Some(parse_addr("admin.bind_address", &config.admin.bind_address)?)
        } else {
            None
        };

        let monitor = router.health_monitor();
        handles.push(tokio::spawn(monitor.run(shutdown.subscribe())));

        if config.cache.enabled {
            if let Some(secs) = config.cache.sweep_interval_secs.filter(|s| *s > 0) {
                handles.push(
                    router
                        .cache()
                        .clone()
                        .spawn_sweeper(Duration::from_secs(secs), shutdown.subscribe()),
                );
            }
        }

        let watcher = match config_path {
            Some(path) => Self::watch(path, router.clone(), shutdown, &mut handles),
            None => None,
        };

        if let Some(addr) = admin_addr {
            let router = router.clone();
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = crate::admin::serve(addr, router, rx).await {
                    tracing::error!(error = %e, "Admin server failed");
                }
            }));
        }

        tracing::info!(tasks = handles.len(), "Background services started");
        Ok(Self {
            handles,
            _watcher: watcher,
        })
    }

    fn watch(
        path: &Path,
        router: Arc<Router>,
        shutdown: &Shutdown,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Option<notify::RecommendedWatcher> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let watcher = match watcher.run() {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start config watcher, reload disabled");
                return None;
            }
        };

        let mut rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(config) = update else { break };
                        if let Err(e) = router.sync_endpoints(&config.endpoints).await {
                            tracing::error!(error = %e, "Failed to apply reloaded endpoints");
                        }
                    }
                    _ = rx.recv() => {
                        tracing::info!("Config reloader received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }));
        Some(watcher)
    }

    /// Wait for every task to exit, up to `grace`.
    pub async fn join(self, grace: Duration) {
        let all = futures_util::future::join_all(self.handles);
        if tokio::time::timeout(grace, all).await.is_err() {
            tracing::warn!(grace = ?grace, "Background tasks did not stop in time");
        }
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|source| StartupError::Address {
        field,
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_services_stop_on_shutdown() {
        let router = Arc::new(Router::new(RouterConfig::default()).unwrap());
        let shutdown = Shutdown::new();
        let services = Services::start(router, &RouterConfig::default(), None, &shutdown).unwrap();

        shutdown.trigger();
        services.join(Duration::from_secs(5)).await;
        assert_eq!(shutdown.receiver_count(), 0);
    }

    #[test]
    fn test_bad_address_is_reported() {
        let err = parse_addr("admin.bind_address", "not-an-address").unwrap_err();
        assert!(err.to_string().contains("admin.bind_address"));
    }
}
