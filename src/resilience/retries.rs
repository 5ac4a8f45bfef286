//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is retryable
//! - Execute retries with exponential backoff (+ optional jitter)
//! - Stop immediately on cancellation
//!
//! # Design Decisions
//! - Engine rejections (circuit open, rate limited) are never retried
//! - Downstream failures and timeouts are retried when the policy predicate agrees
//! - Backoff waits are tokio sleeps raced against the cancellation token

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::PolicyConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::{EventSink, LogSink, ResilienceEvent};
use crate::resilience::backoff::calculate_backoff;

/// Decides whether a transient error should be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>;

/// Immutable retry configuration, shared read-only across calls.
pub struct RetryPolicy<E> {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Option<Duration>,
    pub jitter: bool,
    retryable: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            backoff_multiplier: self.backoff_multiplier,
            max_delay: self.max_delay,
            jitter: self.jitter,
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

impl<E> RetryPolicy<E> {
    /// Exponential policy (multiplier 2) retrying every transient error.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier: 2.0,
            max_delay: None,
            jitter: false,
            retryable: Arc::new(|_| true),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(policy: &PolicyConfig) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay(),
            backoff_multiplier: policy.backoff_multiplier,
            max_delay: policy.max_delay(),
            jitter: policy.jitter,
            retryable: Arc::new(|_| true),
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restrict which transient errors are retried.
    ///
    /// The predicate is only consulted for `Downstream` and `Timeout` errors.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Backoff after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay,
            self.backoff_multiplier,
            self.max_delay,
            self.jitter,
        )
    }

    /// True if the failure of attempt `attempt` should lead to another attempt.
    pub fn should_retry(&self, attempt: u32, error: &ResilienceError<E>) -> bool {
        attempt < self.max_attempts && error.is_transient() && (self.retryable)(error)
    }
}

/// Drives a call through a [`RetryPolicy`].
pub struct RetryExecutor<E> {
    name: String,
    policy: RetryPolicy<E>,
    sink: Arc<dyn EventSink>,
}

impl<E> RetryExecutor<E> {
    /// `name` labels the retry events.
    pub fn new(name: impl Into<String>, policy: RetryPolicy<E>) -> Self {
        Self {
            name: name.into(),
            policy,
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-indexed attempt number.
    pub async fn execute<T, F, Fut>(&self, op: F) -> ResilienceResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        self.execute_cancellable(&CancellationToken::new(), op).await
    }

    /// Like [`execute`](Self::execute), but stops with `Cancelled` as soon as
    /// `cancel` fires, whether an attempt is in flight or a backoff is pending.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
                result = op(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            self.next(attempt, error, cancel).await?;
            attempt += 1;
        }
    }

    /// Settle the failure of attempt `attempt`.
    ///
    /// Returns `Ok(())` once the backoff has elapsed and another attempt should
    /// run, otherwise the error that ends the call (`Cancelled` if `cancel`
    /// fires during the backoff).
    pub(crate) async fn next(
        &self,
        attempt: u32,
        error: ResilienceError<E>,
        cancel: &CancellationToken,
    ) -> ResilienceResult<(), E> {
        if !self.policy.should_retry(attempt, &error) {
            if error.is_transient() {
                tracing::debug!(
                    target_name = %self.name,
                    attempts = attempt,
                    error_kind = %error.kind(),
                    "Call failed"
                );
            }
            return Err(error);
        }
        self.backoff(attempt, cancel).await
    }

    /// Wait out the delay after failed attempt `attempt`.
    async fn backoff(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> ResilienceResult<(), E> {
        let delay = self.policy.delay_for(attempt);
        self.sink.on_event(&ResilienceEvent::RetryScheduled {
            target: self.name.clone(),
            attempt,
            delay,
        });
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Run `op` with `policy`, logging retries through the default sink.
pub async fn execute_with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, op: F) -> ResilienceResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ResilienceResult<T, E>>,
{
    RetryExecutor::new("retry", policy.clone()).execute(op).await
}
