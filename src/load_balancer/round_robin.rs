//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, SelectionPolicy};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn next_endpoint(&self, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::endpoint;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let endpoints = vec![endpoint("a"), endpoint("b")];

        assert_eq!(lb.next_endpoint(&endpoints), Some(0));
        assert_eq!(lb.next_endpoint(&endpoints), Some(1));
        assert_eq!(lb.next_endpoint(&endpoints), Some(0));
        assert_eq!(lb.next_endpoint(&[]), None);
    }
}
