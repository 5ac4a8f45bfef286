//! Observable engine events and the sinks that consume them.
//!
//! # Responsibilities
//! - Describe state transitions and call outcomes as plain values
//! - Hand them to a pluggable sink (logs + metrics by default)
//!
//! # Design Decisions
//! - Sinks are called after the emitting component released its locks
//! - The engine has no opinion on sink format

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::observability::metrics;
use crate::resilience::attempt::CallAttempt;
use crate::resilience::circuit_breaker::CircuitState;

/// Something worth observing happened inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// A circuit changed state.
    StateTransition {
        target: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// An attempt reached downstream and settled.
    AttemptCompleted { target: String, attempt: CallAttempt },
    /// The engine declined to call downstream.
    CallRejected { target: String, reason: ErrorKind },
    /// A failed attempt will be retried after `delay`.
    RetryScheduled {
        target: String,
        attempt: u32,
        delay: Duration,
    },
    /// A terminal error was routed to the caller's fallback.
    FallbackInvoked { target: String, cause: ErrorKind },
}

impl ResilienceEvent {
    /// Target (or rate-limit key) the event belongs to.
    pub fn target(&self) -> &str {
        match self {
            ResilienceEvent::StateTransition { target, .. }
            | ResilienceEvent::AttemptCompleted { target, .. }
            | ResilienceEvent::CallRejected { target, .. }
            | ResilienceEvent::RetryScheduled { target, .. }
            | ResilienceEvent::FallbackInvoked { target, .. } => target,
        }
    }
}

/// Consumer of engine events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent);
}

/// Default sink: structured logs via `tracing` plus `metrics` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::StateTransition { target, from, to } => {
                if *to == CircuitState::Open {
                    tracing::warn!(target_name = %target, from = %from, to = %to, "Circuit state changed");
                } else {
                    tracing::info!(target_name = %target, from = %from, to = %to, "Circuit state changed");
                }
                metrics::record_transition(target, *from, *to);
            }
            ResilienceEvent::AttemptCompleted { target, attempt } => {
                tracing::debug!(
                    target_name = %target,
                    attempt = attempt.number,
                    outcome = %attempt.outcome,
                    latency_ms = attempt.latency.as_millis() as u64,
                    "Attempt settled"
                );
                metrics::record_call(target, attempt.outcome.as_str(), attempt.latency);
            }
            ResilienceEvent::CallRejected { target, reason } => {
                tracing::debug!(target_name = %target, reason = %reason, "Call rejected");
                metrics::record_rejection(target, reason.as_str());
            }
            ResilienceEvent::RetryScheduled {
                target,
                attempt,
                delay,
            } => {
                tracing::info!(target_name = %target, attempt = attempt, delay = ?delay, "Retrying call");
                metrics::record_retry(target);
            }
            ResilienceEvent::FallbackInvoked { target, cause } => {
                tracing::info!(target_name = %target, cause = %cause, "Invoking fallback");
                metrics::record_fallback(target, cause.as_str());
            }
        }
    }
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the `(from, to)` pairs of state transitions.
    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ResilienceEvent::StateTransition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &ResilienceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.on_event(&ResilienceEvent::StateTransition {
            target: "payment".into(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        });
        sink.on_event(&ResilienceEvent::CallRejected {
            target: "payment".into(),
            reason: ErrorKind::CircuitOpen,
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.transitions(), vec![(CircuitState::Closed, CircuitState::Open)]);
        assert!(sink.events().iter().all(|e| e.target() == "payment"));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_log_sink_without_recorder_is_harmless() {
        LogSink.on_event(&ResilienceEvent::RetryScheduled {
            target: "stock".into(),
            attempt: 1,
            delay: Duration::from_millis(10),
        });
    }
}
