//! Per-target state.
//!
//! # Data Flow
//! ```text
//! Call for target name
//!     → registry.rs (look up or create the target's state)
//!     → target.rs (breaker + limiter built from the merged policy)
//!     → Facade runs the call against that state
//! ```
//!
//! # Design Decisions
//! - State is created lazily; first writer wins
//! - Policy is fixed when the target is created

pub mod registry;
pub mod target;

pub use registry::TargetRegistry;
pub use target::{Target, TargetSnapshot};
