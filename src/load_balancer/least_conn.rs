//! Outstanding-request based load balancing strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, SelectionPolicy};

/// Least connections selector.
/// Selects the endpoint with the minimum number of outstanding requests.
/// In case of tie, the first one is selected (stability).
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn next_endpoint(&self, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.in_flight())
            .map(|(i, _)| i)
    }
}

/// Least outstanding requests, ties rotated round-robin so that idle
/// endpoints share load evenly.
#[derive(Debug, Default)]
pub struct LeastOutstanding {
    counter: AtomicUsize,
}

impl LeastOutstanding {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for LeastOutstanding {
    fn name(&self) -> &'static str {
        "least_outstanding"
    }

    fn next_endpoint(&self, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        let len = candidates.len();
        if len == 0 {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % len;
        let mut best = start;
        let mut best_load = candidates[start].in_flight();
        for offset in 1..len {
            let index = (start + offset) % len;
            let load = candidates[index].in_flight();
            if load < best_load {
                best = index;
                best_load = load;
            }
        }
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::endpoint;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = endpoint("b1");
        let b2 = endpoint("b2");

        // artificially increase outstanding requests on b1
        let _g1 = b1.track();
        let endpoints = vec![b1.clone(), b2.clone()];

        // Should pick b2 (0 outstanding)
        assert_eq!(lb.next_endpoint(&endpoints), Some(1));

        let _g2 = b2.track();
        let _g3 = b2.track(); // now b2 has 2, b1 has 1

        assert_eq!(lb.next_endpoint(&endpoints), Some(0));
    }

    #[test]
    fn test_least_outstanding_rotates_ties() {
        let lb = LeastOutstanding::new();
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];

        let picks: Vec<usize> = (0..3).filter_map(|_| lb.next_endpoint(&endpoints)).collect();
        assert_eq!(picks, vec![0, 1, 2]);
    }

    #[test]
    fn test_least_outstanding_prefers_idle() {
        let lb = LeastOutstanding::new();
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let _ga = endpoints[0].track();
        let _gc = endpoints[2].track();

        for _ in 0..5 {
            assert_eq!(lb.next_endpoint(&endpoints), Some(1));
        }
    }
}
