//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build router → Start background services
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Tasks exit their loops → Join with grace
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then router, then background tasks
//! - Shutdown has timeout: tasks still running after the grace period are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{Services, StartupError};
