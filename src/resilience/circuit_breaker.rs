//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a limited number of probes test whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: samples >= min_sample_size and failure rate >= failure_threshold
//! Open → Half-Open: first admission check after open_duration
//! Half-Open → Closed: probe_limit probe successes
//! Half-Open → Open: any probe failure (in-flight probes are interrupted)
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (not global)
//! - All transitions happen under the breaker's own mutex
//! - Every transition bumps a generation; outcomes carrying an older generation
//!   are discarded, so a half-open failure always wins over a late success
//! - Cancelled attempts release their probe slot and are never counted

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, TokioClock};
use crate::config::PolicyConfig;
use crate::error::{ErrorKind, ResilienceError, ResilienceResult};
use crate::observability::{EventSink, LogSink, ResilienceEvent};
use crate::resilience::attempt::{AttemptOutcome, CallAttempt};

/// Runtime state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding for the state gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0..=1.0) at which the circuit trips.
    pub failure_threshold: f64,
    /// Outcomes required in the window before the rate is evaluated.
    pub min_sample_size: usize,
    /// Most recent outcomes kept.
    pub window_size: usize,
    /// Optional age limit for outcomes in the window.
    pub window_duration: Option<Duration>,
    /// Time spent open before probing.
    pub open_duration: Duration,
    /// Probes admitted while half-open; that many successes close the circuit.
    pub probe_limit: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_sample_size: 10,
            window_size: 10,
            window_duration: None,
            open_duration: Duration::from_secs(30),
            probe_limit: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_min_sample_size(mut self, samples: usize) -> Self {
        self.min_sample_size = samples;
        self
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    pub fn with_window_duration(mut self, duration: Duration) -> Self {
        self.window_duration = Some(duration);
        self
    }

    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    pub fn with_probe_limit(mut self, limit: usize) -> Self {
        self.probe_limit = limit;
        self
    }
}

impl From<&PolicyConfig> for CircuitBreakerConfig {
    fn from(policy: &PolicyConfig) -> Self {
        Self {
            failure_threshold: policy.failure_threshold,
            min_sample_size: policy.min_sample_size as usize,
            window_size: policy.window_size as usize,
            window_duration: policy.window_duration(),
            open_duration: policy.open_duration(),
            probe_limit: policy.probe_limit as usize,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub samples: usize,
    pub failures: usize,
    pub failure_rate: f64,
    pub probes_in_flight: usize,
    pub probe_successes: usize,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

/// Admission refused because the circuit is open or the probe slots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: CircuitState,
    pub retry_after: Duration,
}

/// Rolling window of the most recent outcomes.
#[derive(Debug)]
struct OutcomeWindow {
    entries: VecDeque<(Instant, bool)>,
    capacity: usize,
    max_age: Option<Duration>,
}

impl OutcomeWindow {
    fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    fn evict(&mut self, now: Instant) {
        if let Some(max_age) = self.max_age {
            while let Some((at, _)) = self.entries.front() {
                if now.saturating_duration_since(*at) > max_age {
                    self.entries.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.evict(now);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((now, failed));
    }

    /// `(samples, failures)`
    fn counts(&self) -> (usize, usize) {
        let failures = self.entries.iter().filter(|(_, failed)| *failed).count();
        (self.entries.len(), failures)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    window: OutcomeWindow,
    /// Set iff `state == Open`.
    opened_at: Option<Instant>,
    generation: u64,
    probes_in_flight: usize,
    probe_successes: usize,
    /// Cancelled when a probe fails, interrupting the other probes of that epoch.
    probe_abort: CancellationToken,
}

type Transition = (CircuitState, CircuitState);

impl State {
    fn transition(&mut self, to: CircuitState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.probe_abort.cancel();
            }
            CircuitState::HalfOpen => {
                self.opened_at = None;
                self.probe_abort = CancellationToken::new();
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.window.clear();
            }
        }
        (from, to)
    }

    fn open_remaining(&self, now: Instant, open_duration: Duration) -> Option<Duration> {
        self.opened_at
            .map(|at| open_duration.saturating_sub(now.saturating_duration_since(at)))
    }
}

/// Per-target circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    state: Mutex<State>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker using the tokio clock and the logging sink.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = OutcomeWindow::new(config.window_size, config.window_duration);
        Self {
            name: name.into(),
            config,
            clock: Arc::new(TokioClock),
            sink: Arc::new(LogSink),
            state: Mutex::new(State {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                generation: 0,
                probes_in_flight: 0,
                probe_successes: 0,
                probe_abort: CancellationToken::new(),
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_transition(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.sink.on_event(&ResilienceEvent::StateTransition {
                target: self.name.clone(),
                from,
                to,
            });
        }
    }

    /// Current state. An expired open timer is only observed on the next admission.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask to make one call.
    ///
    /// The returned permit must be settled with [`Permit::record`]; dropping it
    /// unsettled treats the call as cancelled.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejected> {
        self.acquire(1)
    }

    fn acquire(&self, attempt: u32) -> Result<Permit<'_>, Rejected> {
        let now = self.clock.now();
        let mut transition = None;

        let admitted = {
            let mut st = self.lock();
            match st.state {
                CircuitState::Closed => Ok((st.generation, None)),
                CircuitState::Open => {
                    let remaining = st
                        .open_remaining(now, self.config.open_duration)
                        .unwrap_or_default();
                    if remaining.is_zero() {
                        transition = Some(st.transition(CircuitState::HalfOpen, now));
                        st.probes_in_flight = 1;
                        Ok((st.generation, Some(st.probe_abort.clone())))
                    } else {
                        Err(Rejected {
                            state: CircuitState::Open,
                            retry_after: remaining,
                        })
                    }
                }
                CircuitState::HalfOpen => {
                    if st.probes_in_flight + st.probe_successes < self.config.probe_limit {
                        st.probes_in_flight += 1;
                        Ok((st.generation, Some(st.probe_abort.clone())))
                    } else {
                        Err(Rejected {
                            state: CircuitState::HalfOpen,
                            retry_after: Duration::ZERO,
                        })
                    }
                }
            }
        };
        self.emit_transition(transition);

        admitted.map(|(generation, probe_abort)| Permit {
            breaker: self,
            generation,
            attempt,
            acquired_at: now,
            probe_abort,
            settled: false,
        })
    }

    /// Fold an outcome into the breaker, possibly transitioning.
    fn settle(&self, generation: u64, probe: bool, outcome: AttemptOutcome) {
        let now = self.clock.now();
        let transition = {
            let mut st = self.lock();
            if st.generation != generation {
                // The epoch this call was admitted in has ended.
                return;
            }
            match (st.state, probe) {
                (CircuitState::Closed, false) => {
                    st.window.record(now, outcome.is_failure());
                    let (samples, failures) = st.window.counts();
                    let rate = failures as f64 / samples as f64;
                    if samples >= self.config.min_sample_size
                        && rate >= self.config.failure_threshold
                    {
                        tracing::debug!(
                            target_name = %self.name,
                            samples,
                            failures,
                            "Failure threshold reached"
                        );
                        Some(st.transition(CircuitState::Open, now))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true) => {
                    st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
                    if outcome.is_failure() {
                        Some(st.transition(CircuitState::Open, now))
                    } else {
                        st.probe_successes += 1;
                        if st.probe_successes >= self.config.probe_limit {
                            Some(st.transition(CircuitState::Closed, now))
                        } else {
                            None
                        }
                    }
                }
                _ => None,
            }
        };
        self.emit_transition(transition);
    }

    fn release_probe(&self, generation: u64) {
        let mut st = self.lock();
        if st.generation == generation && st.state == CircuitState::HalfOpen {
            st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
        }
    }

    fn open_rejection<E>(&self, rejected: Rejected) -> ResilienceError<E> {
        self.sink.on_event(&ResilienceEvent::CallRejected {
            target: self.name.clone(),
            reason: ErrorKind::CircuitOpen,
        });
        ResilienceError::CircuitOpen {
            target: self.name.clone(),
            retry_after: rejected.retry_after,
        }
    }

    /// Run `call` through the breaker.
    pub async fn execute<T, E, Fut>(&self, call: Fut) -> ResilienceResult<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard(1, || async move { call.await.map_err(ResilienceError::Downstream) })
            .await
    }

    /// Run one attempt whose error is already classified.
    ///
    /// `call` is only invoked once admitted. `Downstream` and `Timeout` errors
    /// count as failures; engine rejections and cancellations are not counted.
    pub(crate) async fn guard<T, E, F, Fut>(&self, attempt: u32, call: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        let permit = match self.acquire(attempt) {
            Ok(permit) => permit,
            Err(rejected) => return Err(self.open_rejection(rejected)),
        };

        let call = call();
        let result = match permit.probe_abort.clone() {
            Some(abort) => {
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => {
                        drop(permit);
                        let retry_after = {
                            let now = self.clock.now();
                            self.lock()
                                .open_remaining(now, self.config.open_duration)
                                .unwrap_or_default()
                        };
                        return Err(self.open_rejection(Rejected {
                            state: CircuitState::Open,
                            retry_after,
                        }));
                    }
                    result = call => result,
                }
            }
            None => call.await,
        };

        let outcome = match &result {
            Ok(_) => Some(AttemptOutcome::Success),
            Err(ResilienceError::Downstream(_)) => Some(AttemptOutcome::Failure),
            Err(ResilienceError::Timeout(_)) => Some(AttemptOutcome::Timeout),
            Err(_) => None,
        };
        if let Some(outcome) = outcome {
            permit.record(outcome);
        }
        result
    }

    /// Current counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut st = self.lock();
        st.window.evict(now);
        let (samples, failures) = st.window.counts();
        CircuitSnapshot {
            state: st.state,
            samples,
            failures,
            failure_rate: if samples == 0 {
                0.0
            } else {
                failures as f64 / samples as f64
            },
            probes_in_flight: st.probes_in_flight,
            probe_successes: st.probe_successes,
            open_remaining_ms: st
                .open_remaining(now, self.config.open_duration)
                .map(|d| d.as_millis() as u64),
        }
    }

    /// Force the breaker back to Closed with empty counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut st = self.lock();
            let transition = st.transition(CircuitState::Closed, now);
            (transition.0 != CircuitState::Closed).then_some(transition)
        };
        self.emit_transition(transition);
    }
}

/// Admission ticket for one call.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    attempt: u32,
    acquired_at: Instant,
    probe_abort: Option<CancellationToken>,
    settled: bool,
}

impl Permit<'_> {
    /// True if this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe_abort.is_some()
    }

    /// Report how the call went.
    pub fn record(mut self, outcome: AttemptOutcome) {
        self.settled = true;
        let finished_at = self.breaker.clock.now();
        let attempt = CallAttempt::new(self.attempt, self.acquired_at, finished_at, outcome);
        self.breaker.sink.on_event(&ResilienceEvent::AttemptCompleted {
            target: self.breaker.name.clone(),
            attempt,
        });
        self.breaker
            .settle(self.generation, self.is_probe(), outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.is_probe() {
            self.breaker.release_probe(self.generation);
        }
    }
}
