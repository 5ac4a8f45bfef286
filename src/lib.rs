//! Resilience engine for calls to unreliable downstream services.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller
//!     │  engine.call(target, op, fallback)
//!     ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ facade ── targets (registry of per-target state)         │
//!   │   │                                                       │
//!   │   ├─▶ security::rate_limit   fixed window per key         │
//!   │   ├─▶ resilience::retries    backoff loop                 │
//!   │   │     └─▶ resilience::circuit_breaker   gate + outcomes │
//!   │   │           └─▶ resilience::timeouts    per attempt     │
//!   │   │                 └─▶ downstream op                     │
//!   │   └─▶ fallback(error)                                     │
//!   │                                                           │
//!   │ aggregate: concurrent fan-out, ordered results            │
//!   │ observability: events → logs + metrics                    │
//!   │ config: TOML [defaults] + [targets.<name>]                │
//!   └──────────────────────────────────────────────────────────┘
//! ```

// Building blocks
pub mod clock;
pub mod config;
pub mod error;

// Policies
pub mod aggregate;
pub mod resilience;
pub mod security;

// Composition
pub mod facade;
pub mod targets;

// Cross-cutting concerns
pub mod observability;

pub use aggregate::{AggregateResult, Aggregator, Outcome};
pub use config::{EngineConfig, PolicyConfig};
pub use error::{ErrorKind, ResilienceError, ResilienceResult};
pub use facade::{Chain, Pipeline, ResilienceEngine};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
pub use security::{Gateway, RateLimiter};
