//! Target registry.
//!
//! # Responsibilities
//! - Create per-target state lazily from configuration
//! - Hand out shared references to concurrent callers
//! - Provide status for every known target

use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::{Clock, TokioClock};
use crate::config::EngineConfig;
use crate::observability::{EventSink, LogSink};
use crate::targets::target::{Target, TargetSnapshot};

/// Concurrency-safe map of target name to state.
pub struct TargetRegistry {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    targets: DashMap<String, Arc<Target>>,
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.names())
            .finish_non_exhaustive()
    }
}

impl TargetRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(TokioClock),
            sink: Arc::new(LogSink),
            targets: DashMap::new(),
        }
    }

    /// Must be set before the first target is created.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Must be set before the first target is created.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Shared state for `name`, created on first use.
    ///
    /// Concurrent first calls race on the map entry; exactly one state wins.
    pub fn get_or_create(&self, name: &str) -> Arc<Target> {
        if let Some(target) = self.targets.get(name) {
            return Arc::clone(target.value());
        }
        let entry = self.targets.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(target_name = %name, "Registering target");
            Arc::new(Target::new(
                name,
                self.config.policy_for(name),
                Arc::clone(&self.clock),
                Arc::clone(&self.sink),
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Known target names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Status of every known target, sorted by name.
    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        let mut snapshots: Vec<TargetSnapshot> =
            self.targets.iter().map(|t| t.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Reset one target. Returns false if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(target) => {
                target.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let targets: Vec<Arc<Target>> = self.targets.iter().map(|t| Arc::clone(t.value())).collect();
        for target in targets {
            target.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyOverrides;
    use crate::resilience::circuit_breaker::CircuitState;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.targets.insert(
            "payment".into(),
            PolicyOverrides {
                probe_limit: Some(1),
                rate_limit: Some(5),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_same_state_for_same_name() {
        let registry = TargetRegistry::new(config());
        let a = registry.get_or_create("payment");
        let b = registry.get_or_create("payment");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("inventory").is_none());
    }

    #[test]
    fn test_overrides_applied_per_target() {
        let registry = TargetRegistry::new(config());
        let payment = registry.get_or_create("payment");
        let inventory = registry.get_or_create("inventory");

        assert_eq!(payment.breaker().config().probe_limit, 1);
        assert_eq!(payment.limiter().map(|l| l.limit()), Some(5));
        assert_eq!(inventory.breaker().config().probe_limit, 3);
        assert!(inventory.limiter().is_none());
        assert_eq!(registry.names(), vec!["inventory", "payment"]);
    }

    #[test]
    fn test_concurrent_creation_yields_one_state() {
        let registry = Arc::new(TargetRegistry::new(config()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("booking"))
            })
            .collect();
        let targets: Vec<Arc<Target>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(targets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_reset_and_snapshots() {
        let registry = TargetRegistry::new(config());
        assert!(!registry.reset("missing"));

        let target = registry.get_or_create("payment");
        target.limiter().unwrap().try_acquire("payment");
        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].circuit.state, CircuitState::Closed);
        assert_eq!(snapshots[0].rate_limit.as_ref().map(|r| r.count), Some(1));

        assert!(registry.reset("payment"));
        assert_eq!(registry.snapshots()[0].rate_limit.as_ref().map(|r| r.count), Some(0));
    }
}
