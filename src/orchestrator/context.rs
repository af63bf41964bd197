//! Explicit run dependencies and per-run settings.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentRegistry, EnrichmentProvider, NoEnrichment};
use crate::checkpoint::CheckpointManager;
use crate::dag::SchedulerConfig;
use crate::facts::{FactStore, MatchPolicy};
use crate::progress::RunObserver;
use crate::session::RunMode;
use crate::storage::{
    CheckpointRepository, FactRepository, MemoryStore, RunCache, SessionRepository,
};
use crate::warnings::{CircuitBreaker, EarlyWarningEvaluator};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub mode: RunMode,
    pub fail_fast_on_critical: bool,
    pub max_cost_budget: Option<f64>,
    /// Skip the run cache lookup.
    pub force_refresh: bool,
}

impl RunConfig {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_critical = fail_fast;
        self
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.max_cost_budget = Some(budget);
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn circuit(&self) -> CircuitBreaker {
        CircuitBreaker::new(self.max_cost_budget, self.fail_fast_on_critical)
    }
}

/// Everything a run needs, passed by reference instead of living in globals.
pub struct RunContext {
    pub registry: AgentRegistry,
    pub facts: Arc<FactStore>,
    pub sessions: Arc<dyn SessionRepository>,
    pub checkpoints: CheckpointManager,
    pub cache: Option<Arc<dyn RunCache>>,
    pub cache_ttl: Duration,
    pub evaluator: EarlyWarningEvaluator,
    pub enrichment: Arc<dyn EnrichmentProvider>,
    pub observers: Vec<Arc<dyn RunObserver>>,
    pub scheduler: SchedulerConfig,
}

impl RunContext {
    pub fn new(
        registry: AgentRegistry,
        facts: Arc<FactStore>,
        sessions: Arc<dyn SessionRepository>,
        checkpoints: Arc<dyn CheckpointRepository>,
    ) -> Self {
        Self {
            registry,
            facts,
            sessions,
            checkpoints: CheckpointManager::new(checkpoints),
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            evaluator: EarlyWarningEvaluator::default(),
            enrichment: Arc::new(NoEnrichment),
            observers: Vec::new(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Wire every repository, the cache included, to one backend.
    pub fn with_store<S>(registry: AgentRegistry, store: Arc<S>, policy: MatchPolicy) -> Self
    where
        S: FactRepository + SessionRepository + CheckpointRepository + RunCache + 'static,
    {
        let facts = Arc::new(FactStore::new(store.clone(), policy));
        Self::new(registry, facts, store.clone(), store.clone()).with_cache(store)
    }

    pub fn in_memory(registry: AgentRegistry) -> Self {
        Self::with_store(registry, Arc::new(MemoryStore::new()), MatchPolicy::default())
    }

    pub fn with_cache(mut self, cache: Arc<dyn RunCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_evaluator(mut self, evaluator: EarlyWarningEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn EnrichmentProvider>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_checkpoint_retention(mut self, retention: usize) -> Self {
        self.checkpoints = self.checkpoints.with_retention(retention);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_builds_circuit() {
        let config = RunConfig::new(RunMode::Express)
            .with_fail_fast(true)
            .with_budget(5.0);
        let breaker = config.circuit();
        assert_eq!(breaker.max_cost_budget, Some(5.0));
        assert!(breaker.fail_fast_on_critical);
        assert!(!config.force_refresh);
    }

    #[test]
    fn test_in_memory_context_has_cache() {
        let ctx = RunContext::in_memory(AgentRegistry::new()).with_checkpoint_retention(3);
        assert!(ctx.cache.is_some());
        assert_eq!(ctx.checkpoints.retention(), 3);
        assert!(ctx.without_cache().cache.is_none());
    }
}
