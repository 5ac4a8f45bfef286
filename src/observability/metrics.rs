//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_calls_total` (counter): attempts by target, outcome
//! - `resilience_call_duration_seconds` (histogram): attempt latency by target
//! - `resilience_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `resilience_circuit_transitions_total` (counter): by target, from, to
//! - `resilience_rejections_total` (counter): calls refused by the engine, by reason
//! - `resilience_retries_total` (counter): scheduled retries by target
//! - `resilience_fallbacks_total` (counter): fallbacks invoked by target, cause
//!
//! # Design Decisions
//! - Uses the `metrics` facade; without an installed recorder every call is a no-op
//! - Prometheus exposition is opt-in via `init_metrics`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(target: &str, outcome: &'static str, latency: Duration) {
    counter!("resilience_calls_total", "target" => target.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("resilience_call_duration_seconds", "target" => target.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_transition(target: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "resilience_circuit_transitions_total",
        "target" => target.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("resilience_circuit_state", "target" => target.to_string()).set(to.as_gauge());
}

pub fn record_rejection(target: &str, reason: &'static str) {
    counter!("resilience_rejections_total", "target" => target.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_retry(target: &str) {
    counter!("resilience_retries_total", "target" => target.to_string()).increment(1);
}

pub fn record_fallback(target: &str, cause: &'static str) {
    counter!("resilience_fallbacks_total", "target" => target.to_string(), "cause" => cause)
        .increment(1);
}
