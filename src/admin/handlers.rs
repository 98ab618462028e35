use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::resilience::CircuitState;
use crate::routing::{EndpointStatus, Router, RouterStatus};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    #[serde(flatten)]
    pub router: RouterStatus,
}

pub async fn get_status(State(router): State<Arc<Router>>) -> Json<SystemStatus> {
    let status = router.status();
    let degraded = router
        .health_snapshot()
        .iter()
        .any(|e| e.breaker.state != CircuitState::Closed);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if degraded { "degraded" } else { "operational" },
        router: status,
    })
}

pub async fn get_endpoints(State(router): State<Arc<Router>>) -> Json<Vec<EndpointStatus>> {
    Json(router.health_snapshot())
}

pub async fn get_cache(State(router): State<Arc<Router>>) -> Json<CacheStats> {
    Json(router.cache().stats())
}
