//! Batch-boundary checkpoints and crash recovery.

pub mod manager;
pub mod recovery;

pub use manager::{CheckpointManager, DEFAULT_RETENTION};
pub use recovery::RecoveryPlan;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentResult;
use crate::facts::Contradiction;
use crate::lifecycle::PhaseState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAgent {
    pub agent: String,
    pub error: String,
    pub retries: u32,
}

/// Everything needed to resume a run after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub session_id: Uuid,
    pub state: PhaseState,
    /// Index of the next batch to run.
    pub batch_index: usize,
    pub completed_agents: Vec<String>,
    pub pending_agents: Vec<String>,
    pub failed_agents: Vec<FailedAgent>,
    /// Planned agents the run decided not to execute, e.g. debate agents
    /// after a single finding.
    #[serde(default)]
    pub skipped_agents: Vec<String>,
    pub results: BTreeMap<String, AgentResult>,
    pub total_cost: f64,
    /// Contradictions raised so far in the run.
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    pub start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot a result map. Completed and failed lists are derived from
    /// the results so they can never disagree with them.
    pub fn new(
        session_id: Uuid,
        state: PhaseState,
        batch_index: usize,
        results: &BTreeMap<String, AgentResult>,
        pending_agents: Vec<String>,
        total_cost: f64,
        start_time: DateTime<Utc>,
    ) -> Self {
        let completed_agents = results
            .values()
            .filter(|r| r.success)
            .map(|r| r.agent_name.clone())
            .collect();
        let failed_agents = results
            .values()
            .filter(|r| !r.success)
            .map(|r| FailedAgent {
                agent: r.agent_name.clone(),
                error: r
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
                retries: r.retries,
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            session_id,
            state,
            batch_index,
            completed_agents,
            pending_agents,
            failed_agents,
            skipped_agents: Vec::new(),
            results: results.clone(),
            total_cost,
            contradictions: Vec::new(),
            start_time,
            created_at: Utc::now(),
        }
    }

    pub fn with_skipped(mut self, skipped: Vec<String>) -> Self {
        self.skipped_agents = skipped;
        self
    }

    pub fn with_contradictions(mut self, contradictions: Vec<Contradiction>) -> Self {
        self.contradictions = contradictions;
        self
    }

    /// Every agent the checkpoint has settled, successfully or not.
    pub fn settled(&self) -> BTreeSet<&str> {
        self.completed_agents
            .iter()
            .map(String::as_str)
            .chain(self.failed_agents.iter().map(|f| f.agent.as_str()))
            .collect()
    }

    /// Every agent name the checkpoint mentions.
    pub fn referenced_agents(&self) -> BTreeSet<&str> {
        let mut names = self.settled();
        names.extend(self.pending_agents.iter().map(String::as_str));
        names.extend(self.skipped_agents.iter().map(String::as_str));
        names.extend(self.results.keys().map(String::as_str));
        names
    }

    /// Internal consistency: every settled agent has a result and the
    /// result agrees on success.
    pub fn validate(&self) -> Result<(), String> {
        for name in &self.completed_agents {
            match self.results.get(name) {
                Some(r) if r.success => {}
                Some(_) => return Err(format!("agent '{}' is completed but its result failed", name)),
                None => return Err(format!("agent '{}' is completed but has no result", name)),
            }
        }
        for failed in &self.failed_agents {
            match self.results.get(&failed.agent) {
                Some(r) if !r.success => {}
                Some(_) => {
                    return Err(format!(
                        "agent '{}' is failed but its result succeeded",
                        failed.agent
                    ));
                }
                None => return Err(format!("agent '{}' is failed but has no result", failed.agent)),
            }
        }
        if let Some(name) = self
            .pending_agents
            .iter()
            .find(|p| self.results.contains_key(*p))
        {
            return Err(format!("agent '{}' is pending but already has a result", name));
        }
        if let Some(name) = self.skipped_agents.iter().find(|s| {
            self.results.contains_key(*s) || self.pending_agents.contains(*s)
        }) {
            return Err(format!("agent '{}' is skipped but also pending or run", name));
        }
        if self.state.is_terminal() {
            return Err(format!("checkpoint is in terminal state {}", self.state));
        }
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err(format!("invalid total cost {}", self.total_cost));
        }
        Ok(())
    }
}
