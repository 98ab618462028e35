//! Inference request router.
//!
//! Dispatches inference calls for a named model across a pool of backend
//! endpoints, with circuit breaking, retries under a deadline, bounded
//! concurrency and an optional response cache.
//!
//! # Architecture Overview
//!
//! ```text
//!   Router::submit(model, payload, opts)
//!        │
//!        ├──▶ cache ──────────── hit ─────────────────────────────▶ Response
//!        │
//!        ├──▶ concurrency (global admission)
//!        │
//!        └──▶ resilience::RetryController
//!                 │
//!                 ├──▶ load_balancer (policy + circuit breakers)
//!                 ├──▶ concurrency (endpoint permit)
//!                 └──▶ transport (HTTP │ WebSocket │ custom adapter) ──▶ Backend
//!
//!   Cross-cutting: config (+ hot reload), health (active probes),
//!                  observability (events, logs, metrics), admin, lifecycle
//! ```

// Core
pub mod config;
pub mod error;
pub mod routing;
pub mod transport;

// Traffic management
pub mod cache;
pub mod concurrency;
pub mod health;
pub mod load_balancer;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::RouterConfig;
pub use error::{AdmissionScope, RouterError};
pub use lifecycle::Shutdown;
pub use routing::{Response, Router, RouterBuilder, SubmitOptions};
pub use transport::{Call, TransportAdapter, TransportError, Transports};
