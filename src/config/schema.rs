//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the resilience engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy applied to every target unless overridden.
    pub defaults: PolicyConfig,

    /// Per-target overrides, keyed by target name.
    pub targets: BTreeMap<String, PolicyOverrides>,

    /// Fan-out settings.
    pub aggregate: AggregateConfig,

    /// Per-user admission at the gateway.
    pub gateway: GatewayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Resolve the effective policy for a target.
    pub fn policy_for(&self, target: &str) -> PolicyConfig {
        match self.targets.get(target) {
            Some(overrides) => overrides.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

/// Full resilience policy for one target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Failure rate (0.0..=1.0) at which the circuit trips.
    pub failure_threshold: f64,

    /// Minimum outcomes in the window before the rate is evaluated.
    pub min_sample_size: u32,

    /// Number of most recent outcomes kept in the rolling window.
    pub window_size: u32,

    /// Optional age limit for outcomes in the window, in milliseconds.
    pub window_duration_ms: Option<u64>,

    /// How long the circuit stays open, in milliseconds.
    pub open_duration_ms: u64,

    /// Concurrent probes admitted while half-open, and successes needed to close.
    pub probe_limit: u32,

    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Factor applied to the delay after each attempt.
    pub backoff_multiplier: f64,

    /// Upper bound for a single backoff delay, in milliseconds.
    pub max_delay_ms: Option<u64>,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Admitted calls per window; `None` disables rate limiting.
    pub rate_limit: Option<u32>,

    /// Rate limit window, in milliseconds.
    pub rate_window_ms: u64,

    /// Deadline for a single attempt, in milliseconds.
    pub per_call_timeout_ms: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_sample_size: 10,
            window_size: 10,
            window_duration_ms: None,
            open_duration_ms: 30_000,
            probe_limit: 3,
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: None,
            jitter: false,
            rate_limit: None,
            rate_window_ms: 5_000,
            per_call_timeout_ms: None,
        }
    }
}

impl PolicyConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn window_duration(&self) -> Option<Duration> {
        self.window_duration_ms.map(Duration::from_millis)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn per_call_timeout(&self) -> Option<Duration> {
        self.per_call_timeout_ms.map(Duration::from_millis)
    }
}

/// Partial policy for a single target. Unset fields inherit the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub failure_threshold: Option<f64>,
    pub min_sample_size: Option<u32>,
    pub window_size: Option<u32>,
    pub window_duration_ms: Option<u64>,
    pub open_duration_ms: Option<u64>,
    pub probe_limit: Option<u32>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub rate_limit: Option<u32>,
    pub rate_window_ms: Option<u64>,
    pub per_call_timeout_ms: Option<u64>,
}

impl PolicyOverrides {
    /// Layer these overrides on top of `base`.
    pub fn apply(&self, base: &PolicyConfig) -> PolicyConfig {
        PolicyConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            min_sample_size: self.min_sample_size.unwrap_or(base.min_sample_size),
            window_size: self.window_size.unwrap_or(base.window_size),
            window_duration_ms: self.window_duration_ms.or(base.window_duration_ms),
            open_duration_ms: self.open_duration_ms.unwrap_or(base.open_duration_ms),
            probe_limit: self.probe_limit.unwrap_or(base.probe_limit),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            max_delay_ms: self.max_delay_ms.or(base.max_delay_ms),
            jitter: self.jitter.unwrap_or(base.jitter),
            rate_limit: self.rate_limit.or(base.rate_limit),
            rate_window_ms: self.rate_window_ms.unwrap_or(base.rate_window_ms),
            per_call_timeout_ms: self.per_call_timeout_ms.or(base.per_call_timeout_ms),
        }
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Deadline applied to each sub-call independently, in milliseconds.
    pub per_call_timeout_ms: Option<u64>,
}

/// Per-user gateway admission.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Requests served per user per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            limit: 3,
            window_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_inherit_defaults() {
        let mut config = EngineConfig::default();
        config.targets.insert(
            "payment".into(),
            PolicyOverrides {
                max_attempts: Some(5),
                rate_limit: Some(20),
                ..Default::default()
            },
        );

        let payment = config.policy_for("payment");
        assert_eq!(payment.max_attempts, 5);
        assert_eq!(payment.rate_limit, Some(20));
        assert_eq!(payment.open_duration_ms, 30_000);

        let stock = config.policy_for("stock");
        assert_eq!(stock, PolicyConfig::default());
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            [defaults]
            open_duration_ms = 1000
            per_call_timeout_ms = 250

            [targets.stock]
            max_attempts = 4
            base_delay_ms = 10

            [gateway]
            limit = 10
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.defaults.open_duration(), Duration::from_secs(1));
        assert_eq!(config.defaults.failure_threshold, 0.5);
        assert_eq!(config.gateway.limit, 10);
        assert_eq!(config.gateway.window_ms, 5_000);

        let stock = config.policy_for("stock");
        assert_eq!(stock.max_attempts, 4);
        assert_eq!(stock.base_delay(), Duration::from_millis(10));
        assert_eq!(stock.per_call_timeout(), Some(Duration::from_millis(250)));
    }
}
