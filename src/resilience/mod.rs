//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call:
//!     → timeouts.rs (deadline for the call or per attempt)
//!     → retries.rs (select, acquire permit, invoke, classify)
//!         → circuit_breaker.rs (record outcome, open circuit past threshold)
//!         → On retryable failure: backoff.rs (delay before next attempt)
//! ```
//!
//! # Design Decisions
//! - Every transport attempt has a deadline
//! - Retries only for retryable failures (timeouts, connection errors, 5xx)
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use retries::{AttemptRecord, RetryController};
pub use timeouts::Deadline;
