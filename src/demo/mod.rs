//! Demo scenarios for the `resilience-demo` binary.
//!
//! # Data Flow
//! ```text
//! CLI subcommand
//!     → scenarios.rs (one pattern per function)
//!     → ResilienceEngine / Gateway / Aggregator
//!     → services.rs (simulated downstreams with injected failures)
//! ```

pub mod scenarios;
pub mod services;

use resilience_engine::config::{EngineConfig, PolicyConfig};

/// Configuration used when no file is given: short timers so each scenario
/// finishes in seconds.
pub fn demo_config() -> EngineConfig {
    EngineConfig {
        defaults: PolicyConfig {
            min_sample_size: 5,
            window_size: 10,
            open_duration_ms: 2_000,
            probe_limit: 2,
            base_delay_ms: 200,
            per_call_timeout_ms: Some(1_000),
            ..PolicyConfig::default()
        },
        ..EngineConfig::default()
    }
}
