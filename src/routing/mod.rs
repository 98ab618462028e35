//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Router::submit(model, payload, opts)
//!     → cache lookup (cacheable calls; hit returns here)
//!     → global admission (bounded by the call deadline)
//!     → RetryController::execute
//!         → select → endpoint permit → transport → breaker feedback
//!     → cache population on success
//!     → Response | RouterError
//! ```
//!
//! # Design Decisions
//! - The façade owns every component; callers never touch breaker or
//!   cache state directly
//! - Transport adapters are injected at build time, one per transport kind

pub mod request;
pub mod router;

pub use request::{Response, SubmitOptions};
pub use router::{EndpointStatus, Router, RouterBuilder, RouterStatus};
