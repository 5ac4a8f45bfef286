//! Fan-out aggregation.
//!
//! # Data Flow
//! ```text
//! map of key → call
//!     → aggregator.rs (dispatch all, per-call deadline, join)
//!     → AggregateResult (one slot per key, ordered by key)
//! ```

pub mod aggregator;

pub use aggregator::{AggregateError, AggregateResult, Aggregator, Outcome, Slot};
