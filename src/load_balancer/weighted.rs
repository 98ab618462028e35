//! Weighted random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, SelectionPolicy};

/// Picks an endpoint with probability proportional to its weight.
/// Falls back to a uniform pick when every weight is zero.
#[derive(Debug, Default)]
pub struct Weighted;

impl Weighted {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn next_endpoint(&self, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates.iter().map(|e| u64::from(e.weight())).sum();
        if total == 0 {
            return Some(fastrand::usize(..candidates.len()));
        }

        let mut point = fastrand::u64(..total);
        for (i, endpoint) in candidates.iter().enumerate() {
            let weight = u64::from(endpoint.weight());
            if point < weight {
                return Some(i);
            }
            point -= weight;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::weighted_endpoint;

    #[test]
    fn test_zero_weight_never_picked() {
        let lb = Weighted::new();
        let endpoints = vec![weighted_endpoint("a", 0), weighted_endpoint("b", 5)];
        for _ in 0..100 {
            assert_eq!(lb.next_endpoint(&endpoints), Some(1));
        }
    }

    #[test]
    fn test_distribution_follows_weights() {
        let lb = Weighted::new();
        let endpoints = vec![weighted_endpoint("a", 70), weighted_endpoint("b", 30)];
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[lb.next_endpoint(&endpoints).unwrap()] += 1;
        }
        assert!(counts[0] > 6_000 && counts[0] < 8_000, "counts: {:?}", counts);
    }

    #[test]
    fn test_all_zero_weights_uniform() {
        let lb = Weighted::new();
        let endpoints = vec![weighted_endpoint("a", 0), weighted_endpoint("b", 0)];
        assert!(lb.next_endpoint(&endpoints).is_some());
    }
}
