//! Response caching.
//!
//! # Data Flow
//! ```text
//! submit(model, payload, metadata)
//!     → fingerprint.rs (SHA-256 over model, normalized payload, metadata)
//!     → response.rs get()  → hit: return without admission or dispatch
//!     → ...dispatch...
//!     → response.rs put()  (cacheable calls only)
//! ```
//!
//! # Design Decisions
//! - Sharded concurrent map; writers never block readers of other keys
//! - Expired entries are dropped lazily on lookup and by an optional sweeper
//! - Optional capacity bound evicts the least recently used entry

pub mod fingerprint;
pub mod response;

pub use fingerprint::Fingerprint;
pub use response::{CacheStats, ResponseCache};
