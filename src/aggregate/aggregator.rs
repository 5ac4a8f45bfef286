//! Concurrent fan-out with per-call deadlines.

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::AggregateConfig;

/// How one sub-call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
    /// The sub-call was dropped after this deadline.
    Timeout(Duration),
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
            Outcome::Timeout(_) => "timeout",
        }
    }
}

/// One entry of an [`AggregateResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T, E> {
    pub outcome: Outcome<T, E>,
    pub latency: Duration,
}

/// The first non-successful slot, when merging all-or-nothing.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError<K, E> {
    #[error("Sub-call {key} failed: {error}")]
    Failed { key: K, error: E },

    #[error("Sub-call {key} timed out after {after:?}")]
    TimedOut { key: K, after: Duration },
}

/// Settled outcome of every sub-call, ordered by key.
#[derive(Debug, Clone)]
pub struct AggregateResult<K, T, E> {
    slots: BTreeMap<K, Slot<T, E>>,
    elapsed: Duration,
}

impl<K: Ord, T, E> AggregateResult<K, T, E> {
    pub fn get(&self, key: &K) -> Option<&Outcome<T, E>> {
        self.slots.get(key).map(|slot| &slot.outcome)
    }

    pub fn slot(&self, key: &K) -> Option<&Slot<T, E>> {
        self.slots.get(key)
    }

    pub fn slots(&self) -> &BTreeMap<K, Slot<T, E>> {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wall time from dispatch until the last sub-call settled.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn all_succeeded(&self) -> bool {
        self.slots.values().all(|slot| slot.outcome.is_success())
    }

    pub fn successes(&self) -> impl Iterator<Item = (&K, &T)> {
        self.slots.iter().filter_map(|(key, slot)| match &slot.outcome {
            Outcome::Success(value) => Some((key, value)),
            _ => None,
        })
    }

    /// Failed and timed-out slots.
    pub fn failures(&self) -> impl Iterator<Item = (&K, &Outcome<T, E>)> {
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.outcome.is_success())
            .map(|(key, slot)| (key, &slot.outcome))
    }

    /// All values, or the first non-successful slot in key order.
    pub fn into_values(self) -> Result<BTreeMap<K, T>, AggregateError<K, E>> {
        let mut values = BTreeMap::new();
        for (key, slot) in self.slots {
            match slot.outcome {
                Outcome::Success(value) => {
                    values.insert(key, value);
                }
                Outcome::Failure(error) => return Err(AggregateError::Failed { key, error }),
                Outcome::Timeout(after) => return Err(AggregateError::TimedOut { key, after }),
            }
        }
        Ok(values)
    }
}

/// Dispatches sub-calls concurrently and waits for all of them.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    per_call_timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new(per_call_timeout: Option<Duration>) -> Self {
        Self { per_call_timeout }
    }

    pub fn from_config(config: &AggregateConfig) -> Self {
        Self::new(config.per_call_timeout_ms.map(Duration::from_millis))
    }

    /// Await every call; never fails as a whole.
    ///
    /// Each call gets its own deadline; a slow call does not delay the
    /// deadline of the others.
    pub async fn aggregate<K, T, E, Fut>(&self, calls: BTreeMap<K, Fut>) -> AggregateResult<K, T, E>
    where
        K: Ord + fmt::Debug,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let limit = self.per_call_timeout;

        let pending = calls.into_iter().map(|(key, call)| async move {
            let started = Instant::now();
            let outcome = match limit {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(Ok(value)) => Outcome::Success(value),
                    Ok(Err(error)) => Outcome::Failure(error),
                    Err(_) => Outcome::Timeout(limit),
                },
                None => match call.await {
                    Ok(value) => Outcome::Success(value),
                    Err(error) => Outcome::Failure(error),
                },
            };
            let latency = started.elapsed();
            (key, Slot { outcome, latency })
        });

        let slots: BTreeMap<K, Slot<T, E>> = join_all(pending).await.into_iter().collect();
        let elapsed = start.elapsed();

        for (key, slot) in &slots {
            tracing::debug!(
                key = ?key,
                outcome = slot.outcome.as_str(),
                latency_ms = slot.latency.as_millis() as u64,
                "Sub-call settled"
            );
        }
        AggregateResult { slots, elapsed }
    }
}
