//! Resilience engine entry point.
//!
//! # Responsibilities
//! - Validate configuration once, up front
//! - Resolve per-target pipelines from the registry
//! - Offer one-shot helpers for the common call shapes

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{validate_config, ConfigError, EngineConfig};
use crate::error::{ResilienceError, ResilienceResult};
use crate::facade::pipeline::Pipeline;
use crate::observability::EventSink;
use crate::targets::{TargetRegistry, TargetSnapshot};

/// Shared entry point for protected calls.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct ResilienceEngine {
    registry: TargetRegistry,
}

impl ResilienceEngine {
    /// Build an engine from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        tracing::info!(
            configured_targets = config.targets.len(),
            "Resilience engine ready"
        );
        Ok(Self {
            registry: TargetRegistry::new(config),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.registry = self.registry.with_clock(clock);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.registry = self.registry.with_sink(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Pipeline for `target`, built from its merged policy.
    pub fn pipeline<E>(&self, target: &str) -> Pipeline<E> {
        Pipeline::new(
            self.registry.get_or_create(target),
            Arc::clone(self.registry.sink()),
        )
    }

    /// Protected call without fallback.
    pub async fn call<T, E, F, Fut>(&self, target: &str, op: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.pipeline(target).call(op).await
    }

    /// Protected call; terminal errors other than cancellation go to `fallback`.
    pub async fn call_with_fallback<T, E, F, Fut, FB>(
        &self,
        target: &str,
        op: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(ResilienceError<E>) -> ResilienceResult<T, E>,
    {
        self.pipeline(target).call_with_fallback(op, fallback).await
    }

    /// Protected call that stops as soon as `cancel` fires.
    pub async fn call_cancellable<T, E, F, Fut>(
        &self,
        target: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.pipeline(target).call_cancellable(cancel, op).await
    }

    pub fn snapshot(&self, target: &str) -> Option<TargetSnapshot> {
        self.registry.get(target).map(|t| t.snapshot())
    }

    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        self.registry.snapshots()
    }

    /// Reset one target's breaker and rate limit window.
    pub fn reset(&self, target: &str) -> bool {
        self.registry.reset(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            defaults: PolicyConfig {
                failure_threshold: 1.5,
                ..PolicyConfig::default()
            },
            ..EngineConfig::default()
        };
        let err = ResilienceEngine::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if !errors.is_empty()));
    }

    #[tokio::test]
    async fn test_call_registers_target() {
        let engine = ResilienceEngine::new(EngineConfig::default()).unwrap();
        assert!(engine.snapshot("inventory").is_none());

        let stock: ResilienceResult<u32, ()> = engine.call("inventory", || async { Ok(12) }).await;
        assert_eq!(stock.unwrap(), 12);

        let snapshot = engine.snapshot("inventory").unwrap();
        assert_eq!(snapshot.circuit.samples, 1);
        assert_eq!(engine.snapshots().len(), 1);
        assert!(engine.reset("inventory"));
    }
}
