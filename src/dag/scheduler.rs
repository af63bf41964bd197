//! Kahn-style batch planning.
//!
//! Each batch holds every unscheduled agent whose dependencies are all in
//! earlier batches. When no agent is ready but some remain (a cycle, or a
//! dependency on an agent that does not exist) the remainder is emitted as a
//! single fallback batch, so planning always terminates and every agent is
//! scheduled exactly once.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dag::builder::{AgentGraph, AgentIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default per-agent timeout.
    pub agent_timeout: Duration,
    /// Upper bound on agents in flight within a batch. `None` launches the
    /// whole batch at once.
    pub max_parallel: Option<usize>,
    /// Extra attempts for agents that time out or fail to execute.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(120),
            max_parallel: None,
            max_retries: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max.max(1));
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// All dependencies satisfied.
    Ready,
    /// Degraded batch for agents whose dependencies can never be satisfied.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    pub agents: Vec<String>,
    pub kind: BatchKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Batch>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn agent_count(&self) -> usize {
        self.batches.iter().map(|b| b.agents.len()).sum()
    }

    pub fn is_degraded(&self) -> bool {
        self.batches.iter().any(|b| b.kind == BatchKind::Fallback)
    }
}

pub struct DagScheduler {
    graph: AgentGraph,
}

impl DagScheduler {
    pub fn new(graph: AgentGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &AgentGraph {
        &self.graph
    }

    /// Compute the batch plan. Batch numbering starts at `first_index`.
    pub fn plan(&self, first_index: usize) -> ExecutionPlan {
        let mut completed: HashSet<AgentIndex> = HashSet::new();
        let mut batches = Vec::new();

        while completed.len() < self.graph.len() {
            let ready: Vec<AgentIndex> = (0..self.graph.len())
                .filter(|i| !completed.contains(i))
                .filter(|&i| self.graph.dependencies_satisfied(i, &completed))
                .collect();

            let index = first_index + batches.len();

            if ready.is_empty() {
                let remaining: Vec<String> = (0..self.graph.len())
                    .filter(|i| !completed.contains(i))
                    .filter_map(|i| self.graph.get(i).map(|a| a.name.clone()))
                    .collect();
                warn!(
                    batch = index,
                    agents = ?remaining,
                    cycle = ?self.graph.cycle_members(),
                    unresolved = ?self.graph.unresolved(),
                    "Dependency graph cannot be ordered; running remaining agents as a fallback batch"
                );
                batches.push(Batch {
                    index,
                    agents: remaining,
                    kind: BatchKind::Fallback,
                });
                break;
            }

            let names: Vec<String> = ready
                .iter()
                .filter_map(|&i| self.graph.get(i).map(|a| a.name.clone()))
                .collect();
            debug!(batch = index, agents = ?names, "Planned batch");
            completed.extend(ready);
            batches.push(Batch {
                index,
                agents: names,
                kind: BatchKind::Ready,
            });
        }

        ExecutionPlan { batches }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSpec;
    use crate::dag::builder::DagBuilder;
    use crate::lifecycle::AnalysisPhase;

    fn agent(name: &str, deps: &[&str]) -> AgentSpec {
        AgentSpec::new(name, AnalysisPhase::Analysis).depends_on(deps)
    }

    fn plan(agents: Vec<AgentSpec>) -> ExecutionPlan {
        DagScheduler::new(DagBuilder::new(agents).build().unwrap()).plan(0)
    }

    #[test]
    fn test_batches_linear() {
        let p = plan(vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["b"])]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.batches[0].agents, vec!["a"]);
        assert_eq!(p.batches[1].agents, vec!["b"]);
        assert_eq!(p.batches[2].agents, vec!["c"]);
        assert!(!p.is_degraded());
    }

    #[test]
    fn test_batches_diamond() {
        let p = plan(vec![
            agent("a", &[]),
            agent("b", &["a"]),
            agent("c", &["a"]),
            agent("d", &["b", "c"]),
        ]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.batches[1].agents, vec!["b", "c"]);
        assert_eq!(p.batches[2].agents, vec!["d"]);
    }

    #[test]
    fn test_cycle_degrades_to_single_fallback_batch() {
        let p = plan(vec![
            agent("root", &[]),
            agent("x", &["root", "z"]),
            agent("y", &["x"]),
            agent("z", &["y"]),
        ]);
        assert_eq!(p.len(), 2);
        assert_eq!(p.batches[0].kind, BatchKind::Ready);
        assert_eq!(p.batches[1].kind, BatchKind::Fallback);
        assert_eq!(p.batches[1].agents, vec!["x", "y", "z"]);
        // Every agent is scheduled exactly once.
        assert_eq!(p.agent_count(), 4);
    }

    #[test]
    fn test_missing_dependency_goes_to_fallback() {
        let p = plan(vec![agent("a", &[]), agent("b", &["nowhere"])]);
        assert_eq!(p.batches[0].agents, vec!["a"]);
        assert_eq!(p.batches[1].agents, vec!["b"]);
        assert_eq!(p.batches[1].kind, BatchKind::Fallback);
    }

    #[test]
    fn test_plan_numbering_continues_from_offset() {
        let graph = DagBuilder::new(vec![agent("a", &[]), agent("b", &["a"])])
            .build()
            .unwrap();
        let p = DagScheduler::new(graph).plan(4);
        assert_eq!(p.batches[0].index, 4);
        assert_eq!(p.batches[1].index, 5);
    }

    #[test]
    fn test_empty_plan() {
        assert!(plan(vec![]).is_empty());
    }
}
