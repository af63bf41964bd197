//! Early warnings and the run circuit breaker.
//!
//! Rules are evaluated against each successful agent's output as soon as
//! its batch finishes. Fact contradictions surface as warnings too, but only
//! rule warnings at [`Severity::Critical`] can stop a run.

pub mod circuit;
pub mod evaluator;
pub mod path;
pub mod rule;

pub use circuit::{CircuitBreaker, CircuitDecision};
pub use evaluator::{EarlyWarningEvaluator, WarningSummary};
pub use path::{FieldPath, PathError, Segment};
pub use rule::{Condition, RuleError, WarningRule};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::facts::types::display_json;
use crate::facts::{Contradiction, DeltaClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a warning came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningSource {
    Rule { rule: String },
    Contradiction { fact_key: String, related_key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub recommendation: String,
    pub source: WarningSource,
}

impl Warning {
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Only rule warnings can trip fail-fast.
    pub fn can_halt(&self) -> bool {
        self.is_critical() && matches!(self.source, WarningSource::Rule { .. })
    }

    pub fn from_contradiction(contradiction: &Contradiction) -> Self {
        let severity = match contradiction.class {
            DeltaClass::Major => Severity::Critical,
            DeltaClass::Significant | DeltaClass::Minor => Severity::High,
        };
        let title = if contradiction.fact_key == contradiction.related_key {
            format!("Conflicting values for {}", contradiction.fact_key)
        } else {
            format!(
                "{} contradicts {}",
                contradiction.fact_key, contradiction.related_key
            )
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_name: contradiction.submitted_by.clone(),
            severity,
            category: "fact_contradiction".to_string(),
            title,
            evidence: vec![
                format!(
                    "{} = {} ({}, {}%)",
                    contradiction.related_key,
                    display_json(&contradiction.existing_value),
                    contradiction.existing_source,
                    contradiction.existing_confidence
                ),
                format!(
                    "{} = {} ({}, {}%)",
                    contradiction.fact_key,
                    display_json(&contradiction.new_value),
                    contradiction.new_source,
                    contradiction.new_confidence
                ),
            ],
            confidence: f64::from(contradiction.new_confidence.max(contradiction.existing_confidence))
                / 100.0,
            recommendation: "Resolve the disputed fact before relying on it".to_string(),
            source: WarningSource::Contradiction {
                fact_key: contradiction.fact_key.clone(),
                related_key: contradiction.related_key.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{DisputeReason, FactSource};
    use serde_json::json;

    fn contradiction(class: DeltaClass) -> Contradiction {
        Contradiction {
            subject_id: "d".into(),
            fact_key: "team.competitors".into(),
            related_key: "team.competitors_exist".into(),
            existing_value: json!(false),
            new_value: json!(["A"]),
            existing_source: FactSource::HumanAsserted,
            new_source: FactSource::Inferred,
            existing_confidence: 90,
            new_confidence: 50,
            class,
            reason: DisputeReason::RelatedKey {
                related_key: "team.competitors_exist".into(),
            },
            event_id: Uuid::new_v4(),
            submitted_by: "market_scan".into(),
        }
    }

    #[test]
    fn test_major_contradiction_is_critical_but_cannot_halt() {
        let w = Warning::from_contradiction(&contradiction(DeltaClass::Major));
        assert_eq!(w.severity, Severity::Critical);
        assert!(!w.can_halt());
        assert_eq!(w.agent_name, "market_scan");
        assert_eq!(w.category, "fact_contradiction");
        assert_eq!(w.evidence.len(), 2);
        assert!((w.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_significant_contradiction_is_high() {
        let w = Warning::from_contradiction(&contradiction(DeltaClass::Significant));
        assert_eq!(w.severity, Severity::High);
        assert_eq!(w.title, "team.competitors contradicts team.competitors_exist");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
