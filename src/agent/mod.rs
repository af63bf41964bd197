//! Agent contract.
//!
//! An agent is an independent unit of analysis work. It receives an
//! [`AgentContext`] (subject, visible results, consolidated facts) and
//! returns either an [`AgentOutput`] or a typed [`AgentError`]. The executor
//! turns both into an [`AgentResult`]; agent failures never become errors at
//! the run level.

pub mod command;
pub mod enrichment;
pub mod registry;

pub use command::CommandAgent;
pub use enrichment::{CommandEnrichment, EnrichmentProvider, NoEnrichment};
pub use registry::AgentRegistry;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::facts::{CurrentFact, NewFact};
use crate::lifecycle::AnalysisPhase;
use crate::session::{RunMode, Subject};

/// Static description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub phase: AnalysisPhase,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A failed required agent makes the whole run unsuccessful.
    #[serde(default)]
    pub required: bool,
    /// Overrides the scheduler's default timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AgentSpec {
    pub fn new(name: &str, phase: AnalysisPhase) -> Self {
        Self {
            name: name.to_string(),
            phase,
            depends_on: Vec::new(),
            required: false,
            timeout_secs: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Closed set of agent failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// The agent exceeded its timeout.
    Timeout,
    /// The agent ran and reported failure.
    Execution,
    /// The agent's output could not be interpreted.
    InvalidOutput,
    /// The agent task panicked.
    Panicked,
    /// The agent declined to run because an upstream agent failed.
    DependencyFailed,
}

impl AgentErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Execution => "execution",
            Self::InvalidOutput => "invalid_output",
            Self::Panicked => "panicked",
            Self::DependencyFailed => "dependency_failed",
        }
    }
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Execution, message)
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::InvalidOutput, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            AgentErrorKind::Timeout,
            format!("timed out after {}s", after.as_secs_f64()),
        )
    }

    pub fn dependency_failed(dependency: &str) -> Self {
        Self::new(
            AgentErrorKind::DependencyFailed,
            format!("dependency '{}' failed", dependency),
        )
    }
}

/// What a successful agent returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub facts: Vec<NewFact>,
}

impl AgentOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_facts(mut self, facts: Vec<NewFact>) -> Self {
        self.facts = facts;
        self
    }
}

/// Produced exactly once per agent per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    pub cost: f64,
    pub execution_time_ms: u64,
    /// Attempts beyond the first.
    #[serde(default)]
    pub retries: u32,
    /// Claims reported by the agent, submitted to the fact store after the
    /// batch completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<NewFact>,
}

impl AgentResult {
    pub fn success(agent_name: &str, output: AgentOutput, elapsed: Duration) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            success: true,
            data: Some(output.data),
            error: None,
            cost: output.cost,
            execution_time_ms: elapsed.as_millis() as u64,
            retries: 0,
            facts: output.facts,
        }
    }

    pub fn failure(agent_name: &str, error: AgentError, elapsed: Duration) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            success: false,
            data: None,
            error: Some(error),
            cost: 0.0,
            execution_time_ms: elapsed.as_millis() as u64,
            retries: 0,
            facts: Vec::new(),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn error_kind(&self) -> Option<AgentErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Everything an agent can see when it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub subject: Subject,
    pub mode: RunMode,
    pub phase: AnalysisPhase,
    /// Results of every agent finished so far, failures included.
    pub results: BTreeMap<String, AgentResult>,
    /// Consolidated fact view at the start of the batch.
    pub facts: Vec<CurrentFact>,
    /// Per-run enrichment, recomputed on resume.
    #[serde(default)]
    pub enrichment: Value,
}

impl AgentContext {
    pub fn result(&self, agent: &str) -> Option<&AgentResult> {
        self.results.get(agent)
    }

    /// Data of a successful upstream agent.
    pub fn data(&self, agent: &str) -> Option<&Value> {
        self.results
            .get(agent)
            .filter(|r| r.success)
            .and_then(|r| r.data.as_ref())
    }

    pub fn fact(&self, key: &str) -> Option<&CurrentFact> {
        self.facts.iter().find(|f| f.fact_key == key)
    }

    /// First declared dependency that did not succeed, if any.
    pub fn failed_dependency<'a>(&self, spec: &'a AgentSpec) -> Option<&'a str> {
        spec.depends_on
            .iter()
            .find(|d| self.results.get(*d).is_some_and(|r| !r.success))
            .map(String::as_str)
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn spec(&self) -> &AgentSpec;

    async fn run(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError>;

    fn name(&self) -> &str {
        &self.spec().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactSource;
    use serde_json::json;

    fn context() -> AgentContext {
        let mut results = BTreeMap::new();
        results.insert(
            "ok".to_string(),
            AgentResult::success(
                "ok",
                AgentOutput::new(json!({"score": 7})),
                Duration::from_millis(5),
            ),
        );
        results.insert(
            "broken".to_string(),
            AgentResult::failure(
                "broken",
                AgentError::execution("boom"),
                Duration::from_millis(5),
            ),
        );
        AgentContext {
            subject: Subject::new("d", "D"),
            mode: RunMode::Full,
            phase: AnalysisPhase::Analysis,
            results,
            facts: Vec::new(),
            enrichment: Value::Null,
        }
    }

    #[test]
    fn test_context_exposes_only_successful_data() {
        let ctx = context();
        assert_eq!(ctx.data("ok"), Some(&json!({"score": 7})));
        assert!(ctx.data("broken").is_none());
        assert!(ctx.result("broken").is_some());
    }

    #[test]
    fn test_failed_dependency_detection() {
        let ctx = context();
        let spec = AgentSpec::new("scorer", AnalysisPhase::Synthesis).depends_on(&["ok", "broken"]);
        assert_eq!(ctx.failed_dependency(&spec), Some("broken"));
        let fine = AgentSpec::new("x", AnalysisPhase::Synthesis).depends_on(&["ok"]);
        assert_eq!(ctx.failed_dependency(&fine), None);
    }

    #[test]
    fn test_failure_result_has_no_cost_or_facts() {
        let r = AgentResult::failure(
            "a",
            AgentError::timeout(Duration::from_secs(3)),
            Duration::from_secs(3),
        );
        assert!(!r.success);
        assert_eq!(r.error_kind(), Some(AgentErrorKind::Timeout));
        assert_eq!(r.cost, 0.0);
        assert_eq!(r.execution_time_ms, 3000);
    }

    #[test]
    fn test_output_parses_with_defaults() {
        let output: AgentOutput = serde_json::from_str(
            r#"{"data": {"x": 1}, "facts": [{"fact_key": "team.size", "value": 4, "source": "inferred"}]}"#,
        )
        .unwrap();
        assert_eq!(output.cost, 0.0);
        assert_eq!(output.facts.len(), 1);
        assert_eq!(output.facts[0].source, FactSource::Inferred);
        assert_eq!(output.facts[0].source_confidence, 50);
    }

    #[test]
    fn test_error_display_includes_kind() {
        let err = AgentError::dependency_failed("extractor");
        assert_eq!(err.to_string(), "dependency_failed: dependency 'extractor' failed");
    }

    #[test]
    fn test_spec_timeout_override() {
        let default = Duration::from_secs(60);
        let spec = AgentSpec::new("a", AnalysisPhase::Extraction);
        assert_eq!(spec.timeout(default), default);
        assert_eq!(spec.with_timeout(5).timeout(default), Duration::from_secs(5));
    }
}
