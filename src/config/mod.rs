//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → handed to Router::builder
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Router::sync_endpoints reconciles the endpoint pool
//! ```
//!
//! # Design Decisions
//! - Only the endpoint pool is reconciled on reload; tuning knobs need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use watcher::ConfigWatcher;
pub use schema::{
    AdminConfig, BalancerConfig, BalancingPolicy, CacheConfig, CircuitBreakerConfig,
    ConcurrencyConfig, DeadlineScope, EndpointConfig, HealthCheckConfig, ObservabilityConfig,
    RetryConfig, RouterConfig, TimeoutConfig, TransportKind,
};
