//! Target abstraction.
//!
//! # Responsibilities
//! - Represent a single downstream dependency
//! - Own its circuit breaker and optional rate limiter
//! - Expose a serializable status view

use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::observability::EventSink;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::security::rate_limit::{RateLimitSnapshot, RateLimiter};

/// Status of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub name: String,
    pub circuit: CircuitSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// A downstream dependency and its protection state.
#[derive(Debug)]
pub struct Target {
    name: String,
    policy: PolicyConfig,
    breaker: CircuitBreaker,
    limiter: Option<RateLimiter>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        policy: PolicyConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let name = name.into();
        let breaker = CircuitBreaker::new(name.clone(), CircuitBreakerConfig::from(&policy))
            .with_clock(Arc::clone(&clock))
            .with_sink(sink);
        let limiter = RateLimiter::from_policy(&policy).map(|rl| rl.with_clock(clock));
        Self {
            name,
            policy,
            breaker,
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Status, with the rate limit window of the target-wide key.
    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            name: self.name.clone(),
            circuit: self.breaker.snapshot(),
            rate_limit: self.limiter.as_ref().and_then(|rl| rl.snapshot(&self.name)),
        }
    }

    /// Close the breaker and clear the target-wide rate limit window.
    pub fn reset(&self) {
        self.breaker.reset();
        if let Some(limiter) = &self.limiter {
            limiter.reset(&self.name);
        }
    }
}
