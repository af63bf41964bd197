//! Declarative early-warning rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::Severity;
use super::path::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Equals,
    Below,
    Above,
    /// Substring (case-insensitive) for strings, membership for arrays.
    Contains,
    /// Present and not null.
    Exists,
    /// Missing, null, `""`, `[]` or `{}`.
    Empty,
}

impl Condition {
    pub fn needs_threshold(&self) -> bool {
        matches!(
            self,
            Self::Equals | Self::Below | Self::Above | Self::Contains
        )
    }

    /// Whether one resolved value satisfies the condition.
    pub fn matches(&self, value: &Value, threshold: Option<&Value>) -> bool {
        match self {
            Self::Equals => threshold.is_some_and(|t| values_equal(value, t)),
            Self::Below => compare(value, threshold).is_some_and(|(v, t)| v < t),
            Self::Above => compare(value, threshold).is_some_and(|(v, t)| v > t),
            Self::Contains => threshold.is_some_and(|t| contains(value, t)),
            Self::Exists => !value.is_null(),
            Self::Empty => is_empty(value),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(value: &Value, threshold: Option<&Value>) -> Option<(f64, f64)> {
    Some((value.as_f64()?, threshold?.as_f64()?))
}

fn contains(value: &Value, needle: &Value) -> bool {
    match value {
        Value::String(s) => needle
            .as_str()
            .is_some_and(|n| s.to_lowercase().contains(&n.to_lowercase())),
        Value::Array(items) => items.iter().any(|item| match (item, needle) {
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            _ => values_equal(item, needle),
        }),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("Rule '{rule}' uses condition {condition:?} but has no threshold")]
    MissingThreshold { rule: String, condition: Condition },

    #[error("Rule '{rule}' compares with a non-numeric threshold")]
    NonNumericThreshold { rule: String },
}

/// One early-warning rule, scoped to a single agent's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRule {
    #[serde(alias = "agent")]
    pub agent_name: String,
    #[serde(alias = "field")]
    pub field_path: FieldPath,
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Value>,
    pub severity: Severity,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub evidence_fields: Vec<FieldPath>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

impl WarningRule {
    pub fn new(agent: &str, field: FieldPath, condition: Condition, severity: Severity) -> Self {
        Self {
            agent_name: agent.to_string(),
            field_path: field,
            condition,
            threshold: None,
            severity,
            category: "general".to_string(),
            title: None,
            recommendation: String::new(),
            evidence_fields: Vec::new(),
            confidence: default_confidence(),
        }
    }

    pub fn with_threshold(mut self, threshold: Value) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_recommendation(mut self, recommendation: &str) -> Self {
        self.recommendation = recommendation.to_string();
        self
    }

    pub fn with_evidence(mut self, fields: Vec<FieldPath>) -> Self {
        self.evidence_fields = fields;
        self
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.agent_name, self.field_path)
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.condition.needs_threshold() && self.threshold.is_none() {
            return Err(RuleError::MissingThreshold {
                rule: self.id(),
                condition: self.condition,
            });
        }
        if matches!(self.condition, Condition::Below | Condition::Above)
            && self.threshold.as_ref().and_then(Value::as_f64).is_none()
        {
            return Err(RuleError::NonNumericThreshold { rule: self.id() });
        }
        Ok(())
    }

    /// Values under the rule's path that satisfy its condition. An `empty`
    /// rule whose path reaches nothing fires with a single null.
    pub fn triggering_values<'v>(&self, data: &'v Value) -> Vec<&'v Value> {
        const NULL: &Value = &Value::Null;
        let resolved = self.field_path.resolve(data);
        if resolved.is_empty() && self.condition == Condition::Empty {
            return vec![NULL];
        }
        resolved
            .into_iter()
            .filter(|v| self.condition.matches(v, self.threshold.as_ref()))
            .collect()
    }

    pub fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            let verb = match self.condition {
                Condition::Equals => "equals",
                Condition::Below => "is below",
                Condition::Above => "is above",
                Condition::Contains => "contains",
                Condition::Exists => "is present",
                Condition::Empty => "is empty",
            };
            match &self.threshold {
                Some(t) if self.condition.needs_threshold() => {
                    format!("{} {} {}", self.field_path, verb, t)
                }
                _ => format!("{} {}", self.field_path, verb),
            }
        })
    }
}
