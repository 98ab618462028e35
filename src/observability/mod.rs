//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router components produce:
//!     → events.rs (RouterEvent → EventSink)
//!         → TracingSink: logging + metrics.rs
//!         → embedder-supplied sinks
//!     → logging.rs (subscriber setup)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Events are the only observability interface the core mandates
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventKind, EventSink, FanoutSink, RouterEvent, SharedSink, TracingSink};
