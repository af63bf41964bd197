//! Statically built agent registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Agent, AgentSpec};
use crate::errors::OrchestratorError;
use crate::lifecycle::AnalysisPhase;
use crate::session::RunMode;

/// Agents known to this process, keyed by name. Built once at start-up and
/// shared read-only by every run.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
    /// Registration order, used to keep batches stable.
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), OrchestratorError> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(OrchestratorError::DuplicateAgent(name));
        }
        self.order.push(name.clone());
        self.agents.insert(name, agent);
        Ok(())
    }

    pub fn with(mut self, agent: Arc<dyn Agent>) -> Result<Self, OrchestratorError> {
        self.register(agent)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn specs(&self) -> Vec<AgentSpec> {
        self.order
            .iter()
            .filter_map(|n| self.agents.get(n))
            .map(|a| a.spec().clone())
            .collect()
    }

    pub fn for_phase(&self, phase: AnalysisPhase) -> Vec<Arc<dyn Agent>> {
        self.order
            .iter()
            .filter_map(|n| self.agents.get(n))
            .filter(|a| a.spec().phase == phase)
            .cloned()
            .collect()
    }

    /// Agents a run in `mode` is expected to execute, before any
    /// finding-dependent phase skipping.
    pub fn planned(&self, mode: RunMode) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| {
                self.agents
                    .get(*n)
                    .is_some_and(|a| mode.includes(a.spec().phase))
            })
            .cloned()
            .collect()
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.agents.get(name).is_some_and(|a| a.spec().required)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.order)
            .finish()
    }
}
