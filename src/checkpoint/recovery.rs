//! Diffing a checkpoint against the currently declared agent set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::Checkpoint;
use crate::agent::{AgentRegistry, AgentResult};
use crate::errors::RecoveryError;
use crate::facts::Contradiction;
use crate::lifecycle::PhaseState;

/// What a resumed run starts from.
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub session_id: Uuid,
    pub state: PhaseState,
    pub batch_index: usize,
    pub results: BTreeMap<String, AgentResult>,
    pub total_cost: f64,
    pub start_time: DateTime<Utc>,
    /// Planned agents with no result yet. Failed agents are not retried.
    pub pending: Vec<String>,
    /// Planned agents the interrupted run had decided not to execute.
    pub skipped: Vec<String>,
    pub contradictions: Vec<Contradiction>,
}

impl RecoveryPlan {
    /// Build a plan from the latest checkpoint.
    ///
    /// `planned` is the agent set the session's mode would run today. A
    /// checkpoint naming an agent that is no longer registered is schema
    /// drift and is refused.
    pub fn build(
        session_id: Uuid,
        checkpoint: Option<Checkpoint>,
        planned: &[String],
        registry: &AgentRegistry,
    ) -> Result<Self, RecoveryError> {
        let checkpoint = checkpoint.ok_or(RecoveryError::NoCheckpoint(session_id))?;

        if checkpoint.session_id != session_id {
            return Err(RecoveryError::InvalidCheckpoint {
                session_id,
                message: format!("checkpoint belongs to session {}", checkpoint.session_id),
            });
        }
        checkpoint
            .validate()
            .map_err(|message| RecoveryError::InvalidCheckpoint {
                session_id,
                message,
            })?;

        let unknown: Vec<String> = checkpoint
            .referenced_agents()
            .into_iter()
            .filter(|name| !registry.contains(name))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(RecoveryError::SchemaDrift {
                session_id,
                agents: unknown,
            });
        }

        let settled = checkpoint.settled();
        let pending: Vec<String> = planned
            .iter()
            .filter(|name| !settled.contains(name.as_str()))
            .filter(|name| !checkpoint.skipped_agents.contains(name))
            .cloned()
            .collect();

        info!(
            session = %session_id,
            state = %checkpoint.state,
            completed = checkpoint.completed_agents.len(),
            failed = checkpoint.failed_agents.len(),
            skipped = checkpoint.skipped_agents.len(),
            pending = pending.len(),
            "Recovery plan built"
        );

        Ok(Self {
            session_id,
            state: checkpoint.state,
            batch_index: checkpoint.batch_index,
            results: checkpoint.results,
            total_cost: checkpoint.total_cost,
            start_time: checkpoint.start_time,
            pending,
            skipped: checkpoint.skipped_agents,
            contradictions: checkpoint.contradictions,
        })
    }
}
