//! Deadline enforcement.
//!
//! # Responsibilities
//! - Derive the deadline of a logical call from the caller timeout
//! - Bound each transport attempt by the endpoint timeout and the deadline
//! - Decide whether a backoff sleep still fits before the deadline
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests drive every deadline
//! - `call` scope: one deadline for the whole call, including backoff
//! - `attempt` scope: the caller timeout bounds each attempt separately

use std::time::Duration;
use tokio::time::Instant;

use crate::config::DeadlineScope;

/// Time budget of one logical call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    scope: DeadlineScope,
    timeout: Duration,
    start: Instant,
}

impl Deadline {
    pub fn new(scope: DeadlineScope, timeout: Duration) -> Self {
        Self::starting_at(scope, timeout, Instant::now())
    }

    pub fn starting_at(scope: DeadlineScope, timeout: Duration, start: Instant) -> Self {
        Self {
            scope,
            timeout,
            start,
        }
    }

    pub fn scope(&self) -> DeadlineScope {
        self.scope
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute end of the call. Only meaningful in `call` scope.
    pub fn expires_at(&self) -> Instant {
        self.start + self.timeout
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    /// Whether the call as a whole has run out of time.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.scope == DeadlineScope::Call && now >= self.expires_at()
    }

    /// Whether sleeping `delay` would reach the end of the call.
    pub fn would_expire_after(&self, delay: Duration, now: Instant) -> bool {
        self.scope == DeadlineScope::Call && now + delay >= self.expires_at()
    }

    /// Timeout for one transport attempt against an endpoint whose own
    /// timeout is `endpoint_timeout`.
    pub fn attempt_timeout(&self, endpoint_timeout: Duration, now: Instant) -> Duration {
        match self.scope {
            DeadlineScope::Call => endpoint_timeout.min(self.remaining(now)),
            DeadlineScope::Attempt => endpoint_timeout.min(self.timeout),
        }
    }

    /// Latest instant a gate wait starting at `now` may last until. In
    /// `call` scope that is the end of the call; in `attempt` scope each wait
    /// gets the caller timeout of its own.
    pub fn wait_limit(&self, now: Instant) -> Instant {
        match self.scope {
            DeadlineScope::Call => self.expires_at(),
            DeadlineScope::Attempt => now + self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_scope_shrinks_attempt_timeout() {
        let start = Instant::now();
        let d = Deadline::starting_at(DeadlineScope::Call, Duration::from_millis(500), start);

        let later = start + Duration::from_millis(400);
        assert_eq!(d.attempt_timeout(Duration::from_secs(2), later), Duration::from_millis(100));
        assert_eq!(d.attempt_timeout(Duration::from_millis(50), later), Duration::from_millis(50));
        assert!(d.would_expire_after(Duration::from_millis(100), later));
        assert!(!d.would_expire_after(Duration::from_millis(99), later));
        assert!(d.is_expired(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_attempt_scope_never_expires_call() {
        let start = Instant::now();
        let d = Deadline::starting_at(DeadlineScope::Attempt, Duration::from_millis(500), start);

        let later = start + Duration::from_secs(10);
        assert!(!d.is_expired(later));
        assert!(!d.would_expire_after(Duration::from_secs(5), later));
        assert_eq!(d.attempt_timeout(Duration::from_secs(2), later), Duration::from_millis(500));
    }

    #[test]
    fn test_wait_limit_per_scope() {
        let start = Instant::now();
        let later = start + Duration::from_secs(3);

        let call = Deadline::starting_at(DeadlineScope::Call, Duration::from_millis(500), start);
        assert_eq!(call.wait_limit(later), start + Duration::from_millis(500));

        let attempt = Deadline::starting_at(DeadlineScope::Attempt, Duration::from_millis(500), start);
        assert_eq!(attempt.wait_limit(later), later + Duration::from_millis(500));
    }
}
