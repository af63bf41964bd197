//! In-memory run state owned by the scheduler for the duration of a run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::AgentResult;
use crate::dag::scheduler::BatchKind;
use crate::facts::Contradiction;

/// Write-once result map plus the cumulative cost counter.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    results: BTreeMap<String, AgentResult>,
    total_cost: f64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from checkpointed results.
    pub fn restore(results: BTreeMap<String, AgentResult>, total_cost: f64) -> Self {
        Self {
            results,
            total_cost,
        }
    }

    /// Record a result. A second result for the same agent is rejected and
    /// the first one kept.
    pub fn insert(&mut self, result: AgentResult) -> bool {
        if self.results.contains_key(&result.agent_name) {
            warn!(agent = %result.agent_name, "Ignoring second result for agent");
            return false;
        }
        self.total_cost += result.cost;
        self.results.insert(result.agent_name.clone(), result);
        true
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.results.contains_key(agent)
    }

    pub fn get(&self, agent: &str) -> Option<&AgentResult> {
        self.results.get(agent)
    }

    pub fn results(&self) -> &BTreeMap<String, AgentResult> {
        &self.results
    }

    pub fn into_results(self) -> BTreeMap<String, AgentResult> {
        self.results
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.results
            .values()
            .filter(|r| r.success)
            .map(|r| r.agent_name.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<&AgentResult> {
        self.results.values().filter(|r| !r.success).collect()
    }
}

/// What happened in one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub kind: BatchKind,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub cost: f64,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl BatchReport {
    pub fn executed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentOutput};
    use serde_json::json;

    #[test]
    fn test_results_are_write_once() {
        let mut state = RunState::new();
        let first = AgentResult::success(
            "a",
            AgentOutput::new(json!(1)).with_cost(0.5),
            Duration::ZERO,
        );
        let second = AgentResult::success(
            "a",
            AgentOutput::new(json!(2)).with_cost(0.5),
            Duration::ZERO,
        );

        assert!(state.insert(first));
        assert!(!state.insert(second));
        assert_eq!(state.get("a").unwrap().data, Some(json!(1)));
        assert_eq!(state.total_cost(), 0.5);
    }

    #[test]
    fn test_succeeded_and_failed_partition() {
        let mut state = RunState::new();
        state.insert(AgentResult::success("ok", AgentOutput::default(), Duration::ZERO));
        state.insert(AgentResult::failure(
            "bad",
            AgentError::execution("x"),
            Duration::ZERO,
        ));
        assert_eq!(state.succeeded(), vec!["ok"]);
        assert_eq!(state.failed().len(), 1);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_batch_report_duration_serializes_as_millis() {
        let report = BatchReport {
            index: 0,
            kind: BatchKind::Ready,
            succeeded: vec!["a".to_string()],
            failed: vec![],
            cost: 0.0,
            contradictions: vec![],
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(report.executed(), 1);
    }
}
