//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! One protected call:
//!     → retries.rs (loop over attempts, backoff between them)
//!         → circuit_breaker.rs (admit or fail fast, record the outcome)
//!             → timeouts.rs (per-attempt deadline)
//!                 → downstream operation
//! ```
//!
//! # Design Decisions
//! - Timeouts count as breaker failures
//! - Retries only for transient errors (downstream failures, timeouts)
//! - Circuit breaker prevents cascading failures
//! - Each piece is usable on its own; the facade composes them

pub mod attempt;
pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use attempt::{AttemptOutcome, CallAttempt};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Permit, Rejected,
};
pub use retries::{execute_with_retry, RetryExecutor, RetryPolicy, RetryPredicate};
pub use timeouts::with_timeout;
