//! Sequential service chaining.
//!
//! Each step is a protected call on its own target and receives the previous
//! step's output. The first terminal error stops the chain.

use std::future::Future;

use crate::error::{ResilienceError, ResilienceResult};
use crate::facade::engine::ResilienceEngine;

/// A chain in progress, currently holding a `T` (or the error that stopped it).
pub struct Chain<'a, T, E> {
    engine: &'a ResilienceEngine,
    state: ResilienceResult<T, E>,
    completed: Vec<String>,
    failed_at: Option<String>,
}

impl<'a, T, E> Chain<'a, T, E> {
    /// Start a chain with an initial input.
    pub fn start(engine: &'a ResilienceEngine, input: T) -> Self {
        Self {
            engine,
            state: Ok(input),
            completed: Vec::new(),
            failed_at: None,
        }
    }

    /// Run `step` on `target` with the current value.
    ///
    /// Skipped when an earlier step already failed. `step` may be invoked more
    /// than once if the target's policy retries.
    pub async fn then<U, F, Fut>(self, target: &str, mut step: F) -> Chain<'a, U, E>
    where
        T: Clone,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<U, E>>,
    {
        let Chain {
            engine,
            state,
            mut completed,
            failed_at,
        } = self;

        let input = match state {
            Ok(input) => input,
            Err(error) => {
                return Chain {
                    engine,
                    state: Err(error),
                    completed,
                    failed_at,
                }
            }
        };

        let state = engine.call(target, || step(input.clone())).await;
        let failed_at = match &state {
            Ok(_) => {
                completed.push(target.to_string());
                None
            }
            Err(error) => {
                tracing::warn!(target_name = %target, error_kind = %error.kind(), "Chain stopped");
                Some(target.to_string())
            }
        };
        Chain {
            engine,
            state,
            completed,
            failed_at,
        }
    }

    /// Like [`then`](Self::then), with a fallback for this step's terminal error.
    pub async fn then_or<U, F, Fut, FB>(self, target: &str, mut step: F, fallback: FB) -> Chain<'a, U, E>
    where
        T: Clone,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<U, E>>,
        FB: FnOnce(ResilienceError<E>) -> ResilienceResult<U, E>,
    {
        let Chain {
            engine,
            state,
            mut completed,
            failed_at,
        } = self;

        let input = match state {
            Ok(input) => input,
            Err(error) => {
                return Chain {
                    engine,
                    state: Err(error),
                    completed,
                    failed_at,
                }
            }
        };

        let state = engine
            .call_with_fallback(target, || step(input.clone()), fallback)
            .await;
        let failed_at = match &state {
            Ok(_) => {
                completed.push(target.to_string());
                None
            }
            Err(_) => Some(target.to_string()),
        };
        Chain {
            engine,
            state,
            completed,
            failed_at,
        }
    }

    /// Targets whose step succeeded, in order.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    /// Target whose step stopped the chain.
    pub fn failed_at(&self) -> Option<&str> {
        self.failed_at.as_deref()
    }

    pub fn finish(self) -> ResilienceResult<T, E> {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, PolicyConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct ServiceDown(&'static str);

    fn engine() -> ResilienceEngine {
        ResilienceEngine::new(EngineConfig {
            defaults: PolicyConfig {
                max_attempts: 1,
                ..PolicyConfig::default()
            },
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_each_step_receives_previous_output() {
        let engine = engine();
        let chain = Chain::<_, ServiceDown>::start(&engine, "seat 12A".to_string())
            .then("booking", |seat| async move { Ok::<_, ServiceDown>(format!("booked {seat}")) })
            .await
            .then("payment", |booking| async move { Ok(format!("{booking}, paid")) })
            .await
            .then("notification", |receipt| async move { Ok(format!("{receipt}, notified")) })
            .await;

        assert_eq!(chain.completed(), ["booking", "payment", "notification"]);
        assert_eq!(chain.finish().unwrap(), "booked seat 12A, paid, notified");
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let engine = engine();
        let notified = AtomicU32::new(0);

        let chain = Chain::<_, ServiceDown>::start(&engine, 1u32)
            .then("booking", |id| async move { Ok(id + 1) })
            .await
            .then("payment", |_| async { Err::<u32, _>(ServiceDown("payment")) })
            .await
            .then("notification", |id| {
                notified.fetch_add(1, Ordering::SeqCst);
                async move { Ok(id) }
            })
            .await;

        assert_eq!(chain.failed_at(), Some("payment"));
        assert_eq!(chain.completed(), ["booking"]);
        assert!(matches!(chain.finish(), Err(ResilienceError::Downstream(ServiceDown("payment")))));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_step_fallback_keeps_chain_going() {
        let engine = engine();
        let chain = Chain::<_, ServiceDown>::start(&engine, 100u32)
            .then_or(
                "payment",
                |_| async { Err::<&str, _>(ServiceDown("payment")) },
                |_| Ok("payment queued"),
            )
            .await;

        assert_eq!(chain.failed_at(), None);
        assert_eq!(chain.finish().unwrap(), "payment queued");
    }
}
