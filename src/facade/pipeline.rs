//! Per-target call pipeline.
//!
//! Composition, outermost first:
//! ```text
//! rate limiter → retry loop → circuit breaker gate → per-call timeout → operation
//! ```
//! then the optional fallback on any terminal error except cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ResilienceError, ResilienceResult};
use crate::observability::{EventSink, ResilienceEvent};
use crate::resilience::retries::{RetryExecutor, RetryPolicy};
use crate::resilience::timeouts::with_timeout;
use crate::security::rate_limit::Admission;
use crate::targets::Target;

/// A target's policies, ready to run calls whose downstream error type is `E`.
pub struct Pipeline<E> {
    target: Arc<Target>,
    retry: RetryExecutor<E>,
    per_call_timeout: Option<Duration>,
    rate_key: String,
    sink: Arc<dyn EventSink>,
}

impl<E> Pipeline<E> {
    /// Pipeline with the target's configured policies.
    pub fn new(target: Arc<Target>, sink: Arc<dyn EventSink>) -> Self {
        let policy = target.policy();
        let retry = RetryExecutor::new(target.name(), RetryPolicy::from_config(policy))
            .with_sink(Arc::clone(&sink));
        Self {
            per_call_timeout: policy.per_call_timeout(),
            rate_key: target.name().to_string(),
            retry,
            target,
            sink,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn retry_policy(&self) -> &RetryPolicy<E> {
        self.retry.policy()
    }

    /// Replace the configured retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = RetryExecutor::new(self.target.name(), policy).with_sink(Arc::clone(&self.sink));
        self
    }

    /// Only retry transient errors matching `predicate`.
    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        let policy = self.retry.policy().clone().retry_if(predicate);
        self.with_retry_policy(policy)
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.per_call_timeout = limit;
        self
    }

    /// Count calls against `key` instead of the target-wide window.
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.rate_key = key.into();
        self
    }

    fn admit(&self) -> ResilienceResult<(), E> {
        let Some(limiter) = self.target.limiter() else {
            return Ok(());
        };
        match limiter.try_acquire(&self.rate_key) {
            Admission::Admitted { .. } => Ok(()),
            Admission::Rejected { retry_after } => {
                self.sink.on_event(&ResilienceEvent::CallRejected {
                    target: self.target.name().to_string(),
                    reason: ErrorKind::RateLimited,
                });
                Err(ResilienceError::RateLimited {
                    key: self.rate_key.clone(),
                    retry_after,
                })
            }
        }
    }

    /// One attempt: breaker gate, then the deadline, then the operation.
    async fn attempt<T, F, Fut>(&self, attempt: u32, op: &mut F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let limit = self.per_call_timeout;
        self.target
            .breaker()
            .guard(attempt, || {
                let call = op();
                with_timeout(limit, async move { call.await.map_err(ResilienceError::Downstream) })
            })
            .await
    }

    async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        self.admit()?;

        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
                result = self.attempt(attempt, &mut op) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            self.retry.next(attempt, error, cancel).await?;
            attempt += 1;
        }
    }

    /// Run `op` through the pipeline.
    pub async fn call<T, F, Fut>(&self, op: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(&CancellationToken::new(), op).await
    }

    /// Run `op`, stopping with `Cancelled` as soon as `cancel` fires.
    ///
    /// An attempt interrupted by cancellation is not counted by the breaker.
    pub async fn call_cancellable<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(cancel, op).await
    }

    /// Run `op`, handing any terminal error except cancellation to `fallback`.
    pub async fn call_with_fallback<T, F, Fut, FB>(&self, op: F, fallback: FB) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(ResilienceError<E>) -> ResilienceResult<T, E>,
    {
        self.call_cancellable_with_fallback(&CancellationToken::new(), op, fallback)
            .await
    }

    pub async fn call_cancellable_with_fallback<T, F, Fut, FB>(
        &self,
        cancel: &CancellationToken,
        op: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(ResilienceError<E>) -> ResilienceResult<T, E>,
    {
        match self.run(cancel, op).await {
            Ok(value) => Ok(value),
            Err(ResilienceError::Cancelled) => Err(ResilienceError::Cancelled),
            Err(error) => {
                self.sink.on_event(&ResilienceEvent::FallbackInvoked {
                    target: self.target.name().to_string(),
                    cause: error.kind(),
                });
                fallback(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::PolicyConfig;
    use crate::observability::MemorySink;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Unavailable;

    fn pipeline(policy: PolicyConfig) -> (Pipeline<Unavailable>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let target = Arc::new(Target::new("payment", policy, Arc::new(TokioClock), sink.clone()));
        (Pipeline::new(target, sink.clone()), sink)
    }

    fn quick_policy() -> PolicyConfig {
        PolicyConfig {
            base_delay_ms: 10,
            ..PolicyConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let (pipeline, _) = pipeline(quick_policy());
        let calls = AtomicU32::new(0);

        let result = pipeline
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Unavailable)
                    } else {
                        Ok("paid")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "paid");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_per_attempt() {
        let (pipeline, _) = pipeline(PolicyConfig {
            max_attempts: 2,
            per_call_timeout_ms: Some(50),
            ..quick_policy()
        });
        let calls = AtomicU32::new(0);

        let result: ResilienceResult<(), Unavailable> = pipeline
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Timeout(d)) if d == Duration::from_millis(50)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.target().breaker().snapshot().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_never_reaches_operation() {
        let (pipeline, sink) = pipeline(PolicyConfig {
            rate_limit: Some(1),
            ..quick_policy()
        });
        let calls = AtomicU32::new(0);
        let op = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Unavailable>(()) }
        };

        assert!(pipeline.call(op).await.is_ok());
        let result = pipeline.call(op).await;
        assert!(matches!(result, Err(ResilienceError::RateLimited { ref key, .. }) if key == "payment"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            ResilienceEvent::CallRejected { reason: ErrorKind::RateLimited, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_receives_terminal_error() {
        let (pipeline, sink) = pipeline(PolicyConfig {
            max_attempts: 1,
            ..quick_policy()
        });

        let result = pipeline
            .call_with_fallback(
                || async { Err::<String, _>(Unavailable) },
                |error| {
                    assert!(matches!(error, ResilienceError::Downstream(Unavailable)));
                    Ok("payment queued".to_string())
                },
            )
            .await;

        assert_eq!(result.unwrap(), "payment queued");
        assert!(sink.events().iter().any(|e| matches!(
            e,
            ResilienceEvent::FallbackInvoked { cause: ErrorKind::Downstream, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_skips_fallback() {
        let (pipeline, _) = pipeline(quick_policy());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline
            .call_cancellable_with_fallback(
                &cancel,
                || async { Ok::<_, Unavailable>(1) },
                |_| panic!("fallback must not run on cancellation"),
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_predicate_stops_retries() {
        let (pipeline, _) = pipeline(quick_policy());
        let pipeline = pipeline.retry_if(|e| !matches!(e, ResilienceError::Downstream(Unavailable)));
        let calls = AtomicU32::new(0);

        let result = pipeline
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Unavailable) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
