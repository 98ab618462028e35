//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (every attempt, resilience/retries.rs):
//!     Attempt outcome
//!     → circuit breaker records success/failure
//!     → Open past threshold
//!
//! Active (active.rs):
//!     Periodic timer
//!     → Claim the recovery trial of each tripped endpoint whose cool-down elapsed
//!     → Probe through the endpoint's transport adapter
//!     → Trial success closes the circuit, failure re-opens it
//! ```
//!
//! # Design Decisions
//! - Active probing only touches tripped endpoints; healthy ones are
//!   observed through real traffic
//! - Probes and live calls compete for the same single trial slot

pub mod active;

pub use active::HealthMonitor;
