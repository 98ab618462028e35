//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call for model M
//!     → registry.rs (endpoints of M)
//!     → drop endpoints whose circuit is open
//!     → Apply selection policy:
//!         - least_conn.rs (fewest outstanding requests)
//!         - round_robin.rs (rotate through endpoints)
//!         - weighted.rs (random, proportional to weight)
//!     → breaker admission (normal call or recovery trial)
//!     → Lease (in-flight count held until the attempt ends)
//! ```
//!
//! # Design Decisions
//! - Policies are stateless apart from rotation counters; endpoints track load
//! - Selection and the in-flight increment happen under one per-model lock
//! - Open-circuit endpoints excluded from selection

pub mod balancer;
pub mod endpoint;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;

use crate::config::BalancingPolicy;
use self::endpoint::Endpoint;

pub use balancer::{Lease, LoadBalancer};
pub use endpoint::{EndpointId, StatsSnapshot};
pub use registry::{Registry, SyncReport};

/// Chooses one endpoint among healthy candidates.
pub trait SelectionPolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Index into `candidates`, or `None` if it is empty.
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>]) -> Option<usize>;
}

/// Build the configured policy.
pub fn policy_for(policy: BalancingPolicy) -> Box<dyn SelectionPolicy> {
    match policy {
        BalancingPolicy::LeastOutstanding => Box::new(least_conn::LeastOutstanding::new()),
        BalancingPolicy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        BalancingPolicy::Weighted => Box::new(weighted::Weighted::new()),
        BalancingPolicy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use url::Url;

    use super::endpoint::{Endpoint, EndpointId};
    use crate::config::{CircuitBreakerConfig, TransportKind};

    pub fn endpoint(name: &str) -> Arc<Endpoint> {
        weighted_endpoint(name, 1)
    }

    pub fn weighted_endpoint(name: &str, weight: u32) -> Arc<Endpoint> {
        Arc::new(
            Endpoint::new(
                EndpointId::new("test", name),
                TransportKind::Rest,
                Url::parse("http://127.0.0.1:9000/").unwrap(),
                CircuitBreakerConfig::default(),
            )
            .with_weight(weight),
        )
    }
}
