//! Concurrency admission.
//!
//! # Data Flow
//! ```text
//! Logical call
//!     → gate.rs admit()    (global in-flight bound, once per call)
//!     → balancer selection
//!     → gate.rs acquire()  (per-endpoint bound, once per attempt)
//!     → transport
//! ```
//!
//! # Design Decisions
//! - Bounds are tokio semaphores; permits are owned RAII guards
//! - Callers queue on a saturated bound until `queue_depth` callers are
//!   already waiting, then fail fast with `Overloaded`

pub mod gate;

pub use gate::{ConcurrencyGate, EndpointPermit, GlobalPermit, Permit};
