//! Rule evaluation over agent results.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::rule::{RuleError, WarningRule};
use super::{Severity, Warning, WarningSource};
use crate::agent::AgentResult;
use crate::facts::types::display_json;

/// Counts by severity over a set of warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    /// A rule warning at critical severity was raised.
    pub has_critical: bool,
}

impl WarningSummary {
    pub fn from_warnings<'a>(warnings: impl IntoIterator<Item = &'a Warning>) -> Self {
        let mut summary = Self::default();
        for warning in warnings {
            match warning.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
            }
            summary.has_critical |= warning.can_halt();
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium
    }
}

#[derive(Debug, Clone, Default)]
pub struct EarlyWarningEvaluator {
    rules: Vec<WarningRule>,
}

impl EarlyWarningEvaluator {
    /// Build an evaluator. Rules are validated up front so a bad threshold
    /// fails at startup rather than silently never firing.
    pub fn new(rules: Vec<WarningRule>) -> Result<Self, RuleError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[WarningRule] {
        &self.rules
    }

    pub fn rules_for<'a>(&'a self, agent: &'a str) -> impl Iterator<Item = &'a WarningRule> {
        self.rules.iter().filter(move |r| r.agent_name == agent)
    }

    /// Warnings raised by one result. Failed results raise nothing.
    pub fn evaluate(&self, result: &AgentResult) -> Vec<Warning> {
        if !result.success {
            return Vec::new();
        }
        let Some(data) = result.data.as_ref() else {
            return Vec::new();
        };

        let mut warnings = Vec::new();
        for rule in self.rules_for(&result.agent_name) {
            let matched = rule.triggering_values(data);
            if matched.is_empty() {
                continue;
            }

            let mut evidence: Vec<String> = matched
                .iter()
                .map(|v| format!("{} = {}", rule.field_path, display_json(v)))
                .collect();
            for field in &rule.evidence_fields {
                for value in field.resolve(data) {
                    evidence.push(format!("{} = {}", field, display_json(value)));
                }
            }

            debug!(agent = %result.agent_name, rule = %rule.id(), severity = %rule.severity, "Rule fired");
            warnings.push(Warning {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                agent_name: result.agent_name.clone(),
                severity: rule.severity,
                category: rule.category.clone(),
                title: rule.title(),
                evidence,
                confidence: rule.confidence,
                recommendation: rule.recommendation.clone(),
                source: WarningSource::Rule { rule: rule.id() },
            });
        }
        warnings
    }

    /// Evaluate several results in the given order.
    pub fn evaluate_all<'a>(
        &self,
        results: impl IntoIterator<Item = &'a AgentResult>,
    ) -> Vec<Warning> {
        results.into_iter().flat_map(|r| self.evaluate(r)).collect()
    }
}
