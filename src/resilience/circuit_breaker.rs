//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: a single trial request is in flight
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within window
//! Open → Half-Open: cool-down elapsed and a trial is admitted
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (cool-down grows by the multiplier)
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open (prevents hammering recovering endpoint)
//! - The cool-down is evaluated lazily from `(state, opened_at, now)`;
//!   there is no timer task

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A state change, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// How a call got through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Normal,
    /// The single recovery trial. Admitting it moved the circuit Open → Half-Open.
    Trial,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub trips: u32,
    /// Time since the last state change.
    pub since_change_ms: u64,
    /// Remaining cool-down when open.
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    /// Stored state. `HalfOpen` means the trial is in flight.
    state: CircuitState,
    /// Failure timestamps of the current streak.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Consecutive trips since the circuit last closed.
    trips: u32,
    changed_at: Instant,
}

/// Per-endpoint failure isolation.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trips: 0,
                changed_at: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cool-down after the `trips`-th consecutive trip.
    fn cool_down(&self, trips: u32) -> Duration {
        let base = self.config.cool_down_ms as f64;
        let factor = self
            .config
            .cool_down_multiplier
            .powi(trips.saturating_sub(1).min(i32::MAX as u32) as i32);
        let ms = (base * factor).min(self.config.max_cool_down_ms as f64);
        Duration::from_millis(ms as u64)
    }

    fn cool_down_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        match inner.opened_at {
            Some(opened) => now >= opened + self.cool_down(inner.trips),
            None => true,
        }
    }

    /// Effective state at `now`. An open circuit whose cool-down has elapsed
    /// reports `HalfOpen`: the next call will be admitted as the trial.
    pub fn state_at(&self, now: Instant) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.cool_down_elapsed(&inner, now) => CircuitState::HalfOpen,
            s => s,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    /// Whether a call at `now` would be admitted.
    pub fn is_selectable(&self, now: Instant) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cool_down_elapsed(&inner, now),
            CircuitState::HalfOpen => false,
        }
    }

    /// Admit a call or reject it with `CircuitOpen` semantics.
    pub fn admit(&self, now: Instant) -> Result<Admission, Rejected> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open if self.cool_down_elapsed(&inner, now) => {
                inner.state = CircuitState::HalfOpen;
                inner.changed_at = now;
                Ok(Admission::Trial)
            }
            CircuitState::Open | CircuitState::HalfOpen => Err(Rejected),
        }
    }

    /// Claim the recovery trial only; never admits a normal call.
    pub fn admit_trial(&self, now: Instant) -> Option<Admission> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.cool_down_elapsed(&inner, now) {
            inner.state = CircuitState::HalfOpen;
            inner.changed_at = now;
            Some(Admission::Trial)
        } else {
            None
        }
    }

    pub fn record_success(&self, admission: Admission, now: Instant) -> Option<Transition> {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.opened_at = None;
                inner.trips = 0;
                inner.changed_at = now;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            (CircuitState::Closed, _) => {
                inner.failures.clear();
                None
            }
            // Late results of calls admitted before the circuit tripped.
            _ => None,
        }
    }

    pub fn record_failure(&self, admission: Admission, now: Instant) -> Option<Transition> {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.trips = inner.trips.saturating_add(1);
                Some(self.trip(&mut inner, CircuitState::HalfOpen, now))
            }
            (CircuitState::Closed, _) => {
                let window = Duration::from_millis(self.config.window_ms);
                inner.failures.push_back(now);
                while let Some(&oldest) = inner.failures.front() {
                    if now.duration_since(oldest) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.trips = 1;
                    Some(self.trip(&mut inner, CircuitState::Closed, now))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Resolve a call that ended without an outcome (e.g. the caller was
    /// cancelled). An abandoned trial counts as a failed one.
    pub fn abandon(&self, admission: Admission, now: Instant) -> Option<Transition> {
        match admission {
            Admission::Trial => self.record_failure(admission, now),
            Admission::Normal => None,
        }
    }

    fn trip(&self, inner: &mut Inner, from: CircuitState, now: Instant) -> Transition {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.failures.clear();
        inner.changed_at = now;
        Transition {
            from,
            to: CircuitState::Open,
        }
    }

    /// Current failure streak length.
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().failures.len() as u32
    }

    pub fn last_state_change(&self) -> Instant {
        self.lock().changed_at
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        let state = match inner.state {
            CircuitState::Open if self.cool_down_elapsed(&inner, now) => CircuitState::HalfOpen,
            s => s,
        };
        let retry_in_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                let reopen = opened + self.cool_down(inner.trips);
                Some(reopen.saturating_duration_since(now).as_millis() as u64)
            }
            _ => None,
        };
        BreakerSnapshot {
            state,
            consecutive_failures: inner.failures.len() as u32,
            trips: inner.trips,
            since_change_ms: now.saturating_duration_since(inner.changed_at).as_millis() as u64,
            retry_in_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            window_ms: 10_000,
            cool_down_ms: 1_000,
            cool_down_multiplier: 2.0,
            max_cool_down_ms: 3_000,
        })
    }

    fn trip(cb: &CircuitBreaker, threshold: u32, now: Instant) {
        for _ in 0..threshold {
            cb.record_failure(Admission::Normal, now);
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3);
        let now = Instant::now();

        assert_eq!(cb.record_failure(Admission::Normal, now), None);
        assert_eq!(cb.record_failure(Admission::Normal, now), None);
        assert_eq!(cb.consecutive_failures(), 2);
        let t = cb.record_failure(Admission::Normal, now).unwrap();
        assert_eq!(t.from, CircuitState::Closed);
        assert_eq!(t.to, CircuitState::Open);

        assert_eq!(cb.state_at(now), CircuitState::Open);
        assert_eq!(cb.admit(now), Err(Rejected));
        assert!(!cb.is_selectable(now + Duration::from_millis(999)));
    }

    #[test]
    fn test_success_resets_streak() {
        let cb = breaker(3);
        let now = Instant::now();
        cb.record_failure(Admission::Normal, now);
        cb.record_failure(Admission::Normal, now);
        cb.record_success(Admission::Normal, now);
        cb.record_failure(Admission::Normal, now);
        assert_eq!(cb.state_at(now), CircuitState::Closed);
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let cb = breaker(2);
        let start = Instant::now();
        cb.record_failure(Admission::Normal, start);
        let later = start + Duration::from_secs(11);
        assert_eq!(cb.record_failure(Admission::Normal, later), None);
        assert_eq!(cb.state_at(later), CircuitState::Closed);
    }

    #[test]
    fn test_single_trial_after_cool_down() {
        let cb = breaker(1);
        let now = Instant::now();
        trip(&cb, 1, now);

        let after = now + Duration::from_secs(1);
        assert_eq!(cb.state_at(after), CircuitState::HalfOpen);
        assert_eq!(cb.admit(after), Ok(Admission::Trial));
        // A second caller while the trial is in flight is rejected.
        assert_eq!(cb.admit(after), Err(Rejected));
        assert!(!cb.is_selectable(after));

        let t = cb.record_success(Admission::Trial, after).unwrap();
        assert_eq!(t.to, CircuitState::Closed);
        assert_eq!(cb.admit(after), Ok(Admission::Normal));
    }

    #[test]
    fn test_failed_trial_reopens_with_longer_cool_down() {
        let cb = breaker(1);
        let now = Instant::now();
        trip(&cb, 1, now);

        let t1 = now + Duration::from_secs(1);
        assert_eq!(cb.admit(t1), Ok(Admission::Trial));
        let t = cb.record_failure(Admission::Trial, t1).unwrap();
        assert_eq!((t.from, t.to), (CircuitState::HalfOpen, CircuitState::Open));

        // Second trip doubles the cool-down to 2s.
        assert_eq!(cb.admit(t1 + Duration::from_millis(1_500)), Err(Rejected));
        assert_eq!(cb.admit(t1 + Duration::from_secs(2)), Ok(Admission::Trial));
        cb.record_failure(Admission::Trial, t1 + Duration::from_secs(2));

        // Third trip would be 4s but is capped at 3s.
        let t3 = t1 + Duration::from_secs(2);
        assert_eq!(cb.snapshot(t3).retry_in_ms, Some(3_000));
        assert_eq!(cb.snapshot(t3).trips, 3);
    }

    #[test]
    fn test_abandoned_trial_counts_as_failure() {
        let cb = breaker(1);
        let now = Instant::now();
        trip(&cb, 1, now);
        let after = now + Duration::from_secs(1);
        let admission = cb.admit(after).unwrap();
        assert_eq!(cb.abandon(admission, after).map(|t| t.to), Some(CircuitState::Open));
        assert_eq!(cb.abandon(Admission::Normal, after), None);
    }

    #[test]
    fn test_late_results_do_not_skip_states() {
        let cb = breaker(1);
        let now = Instant::now();
        trip(&cb, 1, now);
        // A normal call admitted before the trip finishes late.
        assert_eq!(cb.record_success(Admission::Normal, now), None);
        assert_eq!(cb.state_at(now), CircuitState::Open);
        assert!(cb.admit_trial(now).is_none());
        assert_eq!(cb.admit_trial(now + Duration::from_secs(1)), Some(Admission::Trial));
    }
}
