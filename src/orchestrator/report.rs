use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentResult;
use crate::facts::Contradiction;
use crate::lifecycle::PhaseState;
use crate::session::TerminationReason;
use crate::warnings::{Severity, Warning};

/// Outcome of a run or resume, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: Uuid,
    pub success: bool,
    pub termination: TerminationReason,
    pub final_state: PhaseState,
    pub results: BTreeMap<String, AgentResult>,
    pub warnings: Vec<Warning>,
    pub contradictions: Vec<Contradiction>,
    pub total_cost: f64,
    /// Served from the run cache; no agent ran.
    pub from_cache: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.success)
            .map(|r| r.agent_name.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| !r.success)
            .map(|r| r.agent_name.as_str())
            .collect()
    }

    pub fn warnings_at(&self, severity: Severity) -> usize {
        self.warnings.iter().filter(|w| w.severity == severity).count()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
