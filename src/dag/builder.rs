//! Dependency graph construction for agents.
//!
//! The graph is lenient: a dependency on an agent that is neither in the
//! graph nor already satisfied is recorded as unresolved rather than
//! rejected, and cycles are reported rather than refused. The scheduler
//! decides how to degrade.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::agent::AgentSpec;
use crate::errors::OrchestratorError;

/// Index into the agent list.
pub type AgentIndex = usize;

/// A dependency that could not be matched to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub agent: String,
    pub dependency: String,
}

#[derive(Debug)]
pub struct AgentGraph {
    agents: Vec<AgentSpec>,
    index_map: HashMap<String, AgentIndex>,
    /// index -> agents that depend on it
    forward_edges: Vec<Vec<AgentIndex>>,
    /// index -> agents it depends on
    reverse_edges: Vec<Vec<AgentIndex>>,
    unresolved: Vec<UnresolvedDependency>,
}

impl AgentGraph {
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, index: AgentIndex) -> Option<&AgentSpec> {
        self.agents.get(index)
    }

    pub fn get_index(&self, name: &str) -> Option<AgentIndex> {
        self.index_map.get(name).copied()
    }

    pub fn agents(&self) -> &[AgentSpec] {
        &self.agents
    }

    pub fn dependents(&self, index: AgentIndex) -> &[AgentIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: AgentIndex) -> &[AgentIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    /// Whether the agent at `index` waits on something outside the graph.
    pub fn has_unresolved(&self, index: AgentIndex) -> bool {
        self.agents
            .get(index)
            .is_some_and(|a| self.unresolved.iter().any(|u| u.agent == a.name))
    }

    pub fn roots(&self) -> Vec<AgentIndex> {
        (0..self.len())
            .filter(|&i| self.dependencies(i).is_empty() && !self.has_unresolved(i))
            .collect()
    }

    pub fn dependencies_satisfied(
        &self,
        index: AgentIndex,
        completed: &HashSet<AgentIndex>,
    ) -> bool {
        !self.has_unresolved(index)
            && self
                .dependencies(index)
                .iter()
                .all(|dep| completed.contains(dep))
    }

    /// Agents that Kahn's algorithm cannot order, i.e. members of a cycle or
    /// downstream of one.
    pub fn cycle_members(&self) -> Vec<String> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();
        let mut queue: Vec<AgentIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        while let Some(node) = queue.pop() {
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .filter_map(|(i, _)| self.agents.get(i).map(|a| a.name.clone()))
            .collect()
    }
}

pub struct DagBuilder {
    agents: Vec<AgentSpec>,
    satisfied: BTreeSet<String>,
}

impl DagBuilder {
    pub fn new(agents: Vec<AgentSpec>) -> Self {
        Self {
            agents,
            satisfied: BTreeSet::new(),
        }
    }

    /// Dependencies already met outside this graph (agents finished in an
    /// earlier phase or skipped by the run mode).
    pub fn with_satisfied(mut self, satisfied: BTreeSet<String>) -> Self {
        self.satisfied = satisfied;
        self
    }

    pub fn build(self) -> Result<AgentGraph, OrchestratorError> {
        let mut index_map = HashMap::new();
        for (i, agent) in self.agents.iter().enumerate() {
            if index_map.insert(agent.name.clone(), i).is_some() {
                return Err(OrchestratorError::DuplicateAgent(agent.name.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<AgentIndex>> = vec![Vec::new(); self.agents.len()];
        let mut reverse_edges: Vec<Vec<AgentIndex>> = vec![Vec::new(); self.agents.len()];
        let mut unresolved = Vec::new();

        for (to_idx, agent) in self.agents.iter().enumerate() {
            for dep in &agent.depends_on {
                if let Some(&from_idx) = index_map.get(dep) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                } else if !self.satisfied.contains(dep) {
                    unresolved.push(UnresolvedDependency {
                        agent: agent.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(AgentGraph {
            agents: self.agents,
            index_map,
            forward_edges,
            reverse_edges,
            unresolved,
        })
    }
}
