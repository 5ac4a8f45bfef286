//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds within 0..=1, counts > 0)
//! - Validate every per-target policy after overrides are applied
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{EngineConfig, PolicyConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{scope}.{field}: {reason}")]
pub struct ValidationError {
    /// `defaults`, `targets.<name>`, `gateway` or `observability`.
    pub scope: String,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(scope: &str, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

/// Validate the whole configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_policy("defaults", &config.defaults, &mut errors);
    for name in config.targets.keys() {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("targets", "name", "target name must not be empty"));
            continue;
        }
        let scope = format!("targets.{name}");
        validate_policy(&scope, &config.policy_for(name), &mut errors);
    }

    if config.aggregate.per_call_timeout_ms == Some(0) {
        errors.push(ValidationError::new("aggregate", "per_call_timeout_ms", "must be > 0"));
    }

    if config.gateway.limit == 0 {
        errors.push(ValidationError::new("gateway", "limit", "must be > 0"));
    }
    if config.gateway.window_ms == 0 {
        errors.push(ValidationError::new("gateway", "window_ms", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability",
            "metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_policy(scope: &str, policy: &PolicyConfig, errors: &mut Vec<ValidationError>) {
    if !(0.0..=1.0).contains(&policy.failure_threshold) || policy.failure_threshold == 0.0 {
        errors.push(ValidationError::new(scope, "failure_threshold", "must be within (0.0, 1.0]"));
    }
    if policy.min_sample_size == 0 {
        errors.push(ValidationError::new(scope, "min_sample_size", "must be > 0"));
    }
    if policy.window_size == 0 {
        errors.push(ValidationError::new(scope, "window_size", "must be > 0"));
    }
    if policy.min_sample_size > policy.window_size {
        errors.push(ValidationError::new(
            scope,
            "min_sample_size",
            format!(
                "{} can never be reached with window_size {}",
                policy.min_sample_size, policy.window_size
            ),
        ));
    }
    if policy.window_duration_ms == Some(0) {
        errors.push(ValidationError::new(scope, "window_duration_ms", "must be > 0"));
    }
    if policy.probe_limit == 0 {
        errors.push(ValidationError::new(scope, "probe_limit", "must be > 0"));
    }
    if policy.max_attempts == 0 {
        errors.push(ValidationError::new(scope, "max_attempts", "must be > 0"));
    }
    if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(scope, "backoff_multiplier", "must be finite and >= 1.0"));
    }
    if let Some(max) = policy.max_delay_ms {
        if max < policy.base_delay_ms {
            errors.push(ValidationError::new(scope, "max_delay_ms", "must be >= base_delay_ms"));
        }
    }
    if policy.rate_limit == Some(0) {
        errors.push(ValidationError::new(scope, "rate_limit", "must be > 0 (omit to disable)"));
    }
    if policy.rate_window_ms == 0 {
        errors.push(ValidationError::new(scope, "rate_window_ms", "must be > 0"));
    }
    if policy.per_call_timeout_ms == Some(0) {
        errors.push(ValidationError::new(scope, "per_call_timeout_ms", "must be > 0"));
    }
}
