//! Admission control.
//!
//! # Data Flow
//! ```text
//! Incoming call:
//!     → rate_limit.rs (fixed window per key)
//!     → gateway.rs (per-user verdicts at the edge)
//!     → Pass to the circuit breaker
//! ```
//!
//! # Design Decisions
//! - Fail closed: a full window rejects without touching downstream
//! - One mutex per key; keys never contend with each other

pub mod gateway;
pub mod rate_limit;

pub use gateway::{Gateway, GatewayVerdict};
pub use rate_limit::{Admission, FixedWindow, RateLimitSnapshot, RateLimiter};
