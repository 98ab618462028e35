//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Delay schedule between attempts of one logical call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_ms: u64,
    multiplier: f64,
    jitter_max_ms: u64,
    max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, multiplier: f64, jitter_max_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier,
            jitter_max_ms,
            max_ms,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.base_delay_ms,
            config.multiplier,
            config.jitter_max_ms,
            config.max_delay_ms,
        )
    }

    /// Delay before `attempt` (1-based) with a random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_max_ms)
        } else {
            0
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay before `attempt` with a fixed jitter. The first attempt is
    /// immediate; attempt `n` waits `base * multiplier^(n-2) + jitter`,
    /// capped at the maximum.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2).min(i32::MAX as u32) as i32;
        let exponential = self.base_ms as f64 * self.multiplier.powi(exponent);
        let delay_ms = (exponential + jitter_ms as f64).min(self.max_ms as f64);

        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = BackoffPolicy::new(100, 2.0, 50, 1000);

        assert_eq!(policy.delay_with_jitter(1, 30), Duration::ZERO);
        assert_eq!(policy.delay_with_jitter(2, 0), Duration::from_millis(100));
        assert_eq!(policy.delay_with_jitter(3, 0), Duration::from_millis(200));
        assert_eq!(policy.delay_with_jitter(4, 25), Duration::from_millis(425));
        assert_eq!(policy.delay_with_jitter(10, 0), Duration::from_millis(1000));
        assert_eq!(policy.delay_with_jitter(60, 50), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new(100, 2.0, 50, 10_000);
        for _ in 0..100 {
            let d = policy.delay(2).as_millis();
            assert!((100..=150).contains(&d), "delay: {}", d);
        }
    }

    #[test]
    fn test_cap_includes_jitter() {
        let policy = BackoffPolicy::new(100, 1.0, 500, 150);
        for _ in 0..100 {
            assert!(policy.delay(5) <= Duration::from_millis(150));
        }
    }
}
