//! Shared utilities for integration and load testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilience_engine::config::{EngineConfig, PolicyConfig, PolicyOverrides};
use resilience_engine::observability::MemorySink;
use resilience_engine::ResilienceEngine;

/// Error returned by scripted services.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownstreamError {
    #[error("service unavailable")]
    Unavailable,
    #[error("not found")]
    NotFound,
}

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(&'static str),
    Fail(DownstreamError),
    /// Wait, then behave like the inner step.
    After(Duration, Box<Step>),
}

impl Step {
    pub fn slow(delay: Duration, step: Step) -> Self {
        Step::After(delay, Box::new(step))
    }
}

/// A deterministic downstream: plays its script in order, then repeats the last step.
#[derive(Debug)]
pub struct ScriptedService {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
}

impl ScriptedService {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let steps: VecDeque<Step> = steps.into_iter().collect();
        let last = steps
            .back()
            .cloned()
            .unwrap_or(Step::Fail(DownstreamError::Unavailable));
        Arc::new(Self {
            steps: Mutex::new(steps),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
        })
    }

    #[allow(dead_code)]
    pub fn healthy(reply: &'static str) -> Arc<Self> {
        Self::new([Step::Reply(reply)])
    }

    #[allow(dead_code)]
    pub fn failing() -> Arc<Self> {
        Self::new([Step::Fail(DownstreamError::Unavailable)])
    }

    #[allow(dead_code)]
    pub fn hanging() -> Arc<Self> {
        Self::new([Step::slow(Duration::from_secs(3600), Step::Reply("too late"))])
    }

    /// Replace whatever is left of the script.
    #[allow(dead_code)]
    pub fn rescript(&self, steps: impl IntoIterator<Item = Step>) {
        let steps: VecDeque<Step> = steps.into_iter().collect();
        if let Some(last) = steps.back() {
            *self.last.lock().unwrap() = last.clone();
        }
        *self.steps.lock().unwrap() = steps;
    }

    /// Number of times the service was actually invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> Result<String, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let next = self.steps.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.last.lock().unwrap().clone())
        };
        play(step).await
    }
}

async fn play(step: Step) -> Result<String, DownstreamError> {
    let mut step = step;
    loop {
        match step {
            Step::Reply(reply) => return Ok(reply.to_string()),
            Step::Fail(error) => return Err(error),
            Step::After(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
        }
    }
}

/// Policy with short timers and no retries, tripping after 4 samples at 50%.
#[allow(dead_code)]
pub fn fast_policy() -> PolicyConfig {
    PolicyConfig {
        failure_threshold: 0.5,
        min_sample_size: 4,
        window_size: 4,
        open_duration_ms: 30_000,
        probe_limit: 2,
        max_attempts: 1,
        base_delay_ms: 100,
        ..PolicyConfig::default()
    }
}

/// Engine with `defaults` as the default policy and per-target overrides.
#[allow(dead_code)]
pub fn engine_with(
    defaults: PolicyConfig,
    targets: &[(&str, PolicyOverrides)],
) -> (Arc<ResilienceEngine>, Arc<MemorySink>) {
    let mut config = EngineConfig {
        defaults,
        ..EngineConfig::default()
    };
    for (name, overrides) in targets {
        config.targets.insert(name.to_string(), overrides.clone());
    }
    let sink = Arc::new(MemorySink::new());
    let engine = ResilienceEngine::new(config)
        .expect("test config must be valid")
        .with_sink(sink.clone());
    (Arc::new(engine), sink)
}

#[allow(dead_code)]
pub fn engine(defaults: PolicyConfig) -> (Arc<ResilienceEngine>, Arc<MemorySink>) {
    engine_with(defaults, &[])
}
