//! Run-level aggregate: the subject under analysis and the session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::lifecycle::{AnalysisPhase, PhaseState};

/// What a run is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Free-form input passed to agents (deck summary, URLs, sector, ...).
    #[serde(default)]
    pub attributes: Value,
}

impl Subject {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            attributes: Value::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// SHA-256 over the canonical JSON of the subject, with object keys
    /// sorted so attribute order does not matter.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::json!({
            "id": self.id,
            "name": self.name,
            "attributes": canonicalize(&self.attributes),
        });
        hex::encode(Sha256::digest(value.to_string().as_bytes()))
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// How much of the lifecycle a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Full,
    /// Skips debate.
    Lite,
    /// Skips gathering and debate.
    Express,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Lite => "lite",
            Self::Express => "express",
        }
    }

    pub fn includes(&self, phase: AnalysisPhase) -> bool {
        match self {
            Self::Full => true,
            Self::Lite => phase != AnalysisPhase::Debate,
            Self::Express => !matches!(phase, AnalysisPhase::Gathering | AnalysisPhase::Debate),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "lite" => Ok(Self::Lite),
            "express" => Ok(Self::Express),
            _ => anyhow::bail!("Invalid run mode '{}'. Valid values: full, lite, express", s),
        }
    }
}

/// Why a run stopped scheduling work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every planned phase ran.
    Completed,
    /// Accumulated cost reached the budget before a batch.
    CostLimitReached { spent: f64, budget: f64 },
    /// Fail-fast tripped on critical warnings.
    CriticalWarning { count: usize },
    /// One or more required agents failed.
    RequiredAgentsFailed { agents: Vec<String> },
    /// The session could not be resumed.
    RecoveryFailed { message: String },
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CostLimitReached { .. } => "cost_limit_reached",
            Self::CriticalWarning { .. } => "critical_warning",
            Self::RequiredAgentsFailed { .. } => "required_agents_failed",
            Self::RecoveryFailed { .. } => "recovery_failed",
        }
    }

    pub fn is_early_halt(&self) -> bool {
        matches!(
            self,
            Self::CostLimitReached { .. } | Self::CriticalWarning { .. }
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CostLimitReached { spent, budget } => {
                write!(f, "cost limit reached ({:.2} of {:.2})", spent, budget)
            }
            Self::CriticalWarning { count } => {
                write!(f, "halted on {} critical warning(s)", count)
            }
            Self::RequiredAgentsFailed { agents } => {
                write!(f, "required agents failed: {}", agents.join(", "))
            }
            Self::RecoveryFailed { message } => write!(f, "recovery failed: {}", message),
        }
    }
}

/// Persisted digest of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub termination: TerminationReason,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub critical_warnings: usize,
    pub high_warnings: usize,
    pub contradictions: usize,
    pub total_cost: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub subject_id: String,
    pub subject: Subject,
    pub mode: RunMode,
    pub phase_state: PhaseState,
    pub total_agents: usize,
    pub completed_agents: usize,
    pub total_cost: f64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub fingerprint: String,
}

impl AnalysisSession {
    pub fn new(subject: Subject, mode: RunMode, total_agents: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject.id.clone(),
            fingerprint: subject.fingerprint(),
            subject,
            mode,
            phase_state: PhaseState::Init,
            total_agents,
            completed_agents: 0,
            total_cost: 0.0,
            started_at: Utc::now(),
            completed_at: None,
            summary: None,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase_state.is_terminal()
    }

    /// Record the outcome of a finished run. The phase state is owned by the
    /// state machine and is not touched here.
    pub fn finish(&mut self, summary: RunSummary) {
        self.total_cost = summary.total_cost;
        if !summary.success {
            self.failure_reason = Some(summary.termination.to_string());
        }
        self.summary = Some(summary);
        self.completed_at = Some(Utc::now());
    }

    pub fn progress_label(&self) -> String {
        format!("{}/{}", self.completed_agents, self.total_agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_attribute_order() {
        let a = Subject::new("deal-1", "Acme").with_attributes(json!({"sector": "saas", "stage": "seed"}));
        let b: Subject = serde_json::from_str(
            r#"{"id":"deal-1","name":"Acme","attributes":{"stage":"seed","sector":"saas"}}"#,
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = Subject::new("deal-1", "Acme").with_attributes(json!({"sector": "fintech"}));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_mode_phase_inclusion() {
        assert!(RunMode::Full.includes(AnalysisPhase::Debate));
        assert!(!RunMode::Lite.includes(AnalysisPhase::Debate));
        assert!(RunMode::Lite.includes(AnalysisPhase::Gathering));
        assert!(!RunMode::Express.includes(AnalysisPhase::Gathering));
        assert!(RunMode::Express.includes(AnalysisPhase::Synthesis));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("LITE".parse::<RunMode>().unwrap(), RunMode::Lite);
        assert!("turbo".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_new_session_starts_in_init() {
        let session = AnalysisSession::new(Subject::new("d", "D"), RunMode::Full, 4);
        assert_eq!(session.phase_state, PhaseState::Init);
        assert!(!session.is_terminal());
        assert_eq!(session.progress_label(), "0/4");
    }

    #[test]
    fn test_termination_reason_serializes_tagged() {
        let reason = TerminationReason::CostLimitReached {
            spent: 5.0,
            budget: 4.0,
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "cost_limit_reached");
        assert!(reason.is_early_halt());
        assert!(!TerminationReason::Completed.is_early_halt());
    }
}
