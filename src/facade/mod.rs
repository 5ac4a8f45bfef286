//! Resilience facade.
//!
//! # Data Flow
//! ```text
//! engine.call(target, op, fallback)
//!     → engine.rs (resolve target state from the registry)
//!     → pipeline.rs (rate limit → retry → breaker → timeout → op)
//!     → fallback on terminal error
//! chain.rs runs several such calls in sequence
//! ```
//!
//! # Design Decisions
//! - Composition is plain function nesting, no interception layer
//! - Cancellation never reaches the fallback

pub mod chain;
pub mod engine;
pub mod pipeline;

pub use chain::Chain;
pub use engine::ResilienceEngine;
pub use pipeline::Pipeline;
