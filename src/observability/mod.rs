//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breaker / retry / limiter / facade produce:
//!     → events.rs (ResilienceEvent values)
//!     → EventSink (LogSink by default)
//!         → logging.rs (structured log events)
//!         → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Metrics are cheap (facade no-ops without a recorder)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventSink, LogSink, MemorySink, ResilienceEvent};
