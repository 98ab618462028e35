//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject duplicate endpoint identities
//! - Validate value ranges (thresholds > 0, multipliers >= 1)
//! - Check endpoint URLs match their transport
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use url::Url;

use crate::config::schema::{RouterConfig, TransportKind};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (i, ep) in config.endpoints.iter().enumerate() {
        let field = format!("endpoints[{}]", i);

        if ep.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        }
        if ep.model.is_empty() {
            errors.push(ValidationError::new(format!("{}.model", field), "must not be empty"));
        }
        if !seen.insert((ep.model.as_str(), ep.name.as_str())) {
            errors.push(ValidationError::new(
                field.clone(),
                format!("duplicate endpoint {}/{}", ep.model, ep.name),
            ));
        }
        if ep.timeout_ms == 0 {
            errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
        }
        if ep.max_in_flight == Some(0) {
            errors.push(ValidationError::new(format!("{}.max_in_flight", field), "must be > 0"));
        }

        match Url::parse(&ep.url) {
            Ok(url) => {
                let ok = match ep.transport {
                    TransportKind::Rest => matches!(url.scheme(), "http" | "https"),
                    TransportKind::Stream => matches!(url.scheme(), "ws" | "wss"),
                };
                if !ok {
                    errors.push(ValidationError::new(
                        format!("{}.url", field),
                        format!("scheme '{}' does not match transport {}", url.scheme(), ep.transport),
                    ));
                }
            }
            Err(e) => {
                errors.push(ValidationError::new(format!("{}.url", field), e.to_string()));
            }
        }
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.window_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_ms", "must be > 0"));
    }
    // Written negated so NaN is rejected too.
    if !(cb.cool_down_multiplier >= 1.0 && cb.cool_down_multiplier.is_finite()) {
        errors.push(ValidationError::new("circuit_breaker.cool_down_multiplier", "must be a finite number >= 1.0"));
    }
    if cb.max_cool_down_ms < cb.cool_down_ms {
        errors.push(ValidationError::new(
            "circuit_breaker.max_cool_down_ms",
            "must be >= cool_down_ms",
        ));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if !(retries.multiplier >= 1.0 && retries.multiplier.is_finite()) {
        errors.push(ValidationError::new("retries.multiplier", "must be a finite number >= 1.0"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new("retries.max_delay_ms", "must be >= base_delay_ms"));
    }

    let concurrency = &config.concurrency;
    if concurrency.global_max_in_flight == 0 {
        errors.push(ValidationError::new("concurrency.global_max_in_flight", "must be > 0"));
    }
    if concurrency.per_endpoint_max_in_flight == 0 {
        errors.push(ValidationError::new("concurrency.per_endpoint_max_in_flight", "must be > 0"));
    }

    if config.cache.max_entries == Some(0) {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0 when set"));
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
