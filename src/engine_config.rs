//! Engine configuration read from `.deal-engine/engine.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags (applied by
//! the command layer).
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! mode = "full"
//! fail_fast_on_critical = true
//! max_cost_budget = 25.0
//!
//! [scheduler]
//! agent_timeout_secs = 120
//! max_parallel = 4
//! max_retries = 1
//!
//! [facts]
//! dispute_threshold = 0.30
//! minor_threshold = 0.10
//!
//! [checkpoints]
//! retention = 10
//!
//! [cache]
//! enabled = true
//! ttl_hours = 24
//!
//! [enrichment]
//! command = "./scripts/market_context.sh"
//! timeout_secs = 30
//!
//! [[agents]]
//! name = "financials"
//! phase = "analysis"
//! command = "./agents/financials.py"
//! depends_on = ["extractor"]
//! required = true
//!
//! [[warnings.rules]]
//! agent = "financials"
//! field = "metrics.burn_multiple"
//! condition = "above"
//! threshold = 3.0
//! severity = "critical"
//! category = "financial"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::agent::AgentSpec;
use crate::dag::SchedulerConfig;
use crate::facts::MatchPolicy;
use crate::lifecycle::AnalysisPhase;
use crate::orchestrator::RunConfig;
use crate::session::RunMode;
use crate::warnings::WarningRule;

pub const CONFIG_FILE: &str = "engine.toml";

/// Written by `deal-engine init`. The agents are shell one-liners so a fresh
/// project can run end to end before real agents exist.
pub const STARTER_CONFIG: &str = r#"# deal-engine configuration

[run]
mode = "lite"
fail_fast_on_critical = false
# max_cost_budget = 5.0

[scheduler]
agent_timeout_secs = 120
max_retries = 0

[facts]
dispute_threshold = 0.30
minor_threshold = 0.10

[checkpoints]
retention = 10

[cache]
enabled = true
ttl_hours = 24

# Each agent reads its context JSON on stdin and prints
# {"data": ..., "cost": 0.0, "facts": [...]} on stdout.
[[agents]]
name = "extractor"
phase = "extraction"
command = """echo '{"data":{"runway_months":18},"facts":[{"fact_key":"financial.runway_months","value":18,"source":"document_derived","source_confidence":70}]}'"""
required = true

[[agents]]
name = "financials"
phase = "analysis"
command = """echo '{"data":{"runway_months":18,"burn_multiple":1.4},"cost":0.01}'"""
depends_on = ["extractor"]

[[agents]]
name = "memo"
phase = "synthesis"
command = """echo '{"data":{"recommendation":"proceed"}}'"""
depends_on = ["financials"]

[[warnings.rules]]
agent = "financials"
field = "runway_months"
condition = "below"
threshold = 6
severity = "critical"
category = "financial"
recommendation = "Confirm the cash position before proceeding"
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub fail_fast_on_critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_budget: Option<f64>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            fail_fast_on_critical: false,
            max_cost_budget: None,
            force_refresh: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub max_retries: u32,
}

fn default_agent_timeout_secs() -> u64 {
    120
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout_secs(),
            max_parallel: None,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactsSection {
    #[serde(default = "default_dispute_threshold")]
    pub dispute_threshold: f64,
    #[serde(default = "default_minor_threshold")]
    pub minor_threshold: f64,
}

fn default_dispute_threshold() -> f64 {
    0.30
}

fn default_minor_threshold() -> f64 {
    0.10
}

impl Default for FactsSection {
    fn default() -> Self {
        Self {
            dispute_threshold: default_dispute_threshold(),
            minor_threshold: default_minor_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointsSection {
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_retention() -> usize {
    crate::checkpoint::DEFAULT_RETENTION
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_ttl_hours() -> u64 {
    24
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSection {
    pub command: String,
    #[serde(default = "default_enrichment_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enrichment_timeout_secs() -> u64 {
    30
}

/// A command agent declared in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub phase: AnalysisPhase,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl AgentDef {
    pub fn spec(&self) -> AgentSpec {
        AgentSpec {
            name: self.name.clone(),
            phase: self.phase,
            depends_on: self.depends_on.clone(),
            required: self.required,
            timeout_secs: self.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningsSection {
    #[serde(default)]
    pub rules: Vec<WarningRule>,
}

/// The complete engine.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub facts: FactsSection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSection>,
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub warnings: WarningsSection,
}

impl EngineToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse engine.toml")
    }

    /// Load `engine.toml` from `engine_dir`, or defaults if it is absent.
    pub fn load_or_default(engine_dir: &Path) -> Result<Self> {
        let config_path = engine_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize engine.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Environment overrides on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("DEAL_ENGINE_MAX_COST") {
            let budget: f64 = raw
                .parse()
                .with_context(|| format!("Invalid DEAL_ENGINE_MAX_COST '{}'", raw))?;
            self.run.max_cost_budget = Some(budget);
        }
        if let Some(raw) = lookup("DEAL_ENGINE_MODE") {
            self.run.mode = raw.parse()?;
        }
        if let Some(raw) = lookup("DEAL_ENGINE_FAIL_FAST") {
            self.run.fail_fast_on_critical = !matches!(raw.as_str(), "0" | "false" | "no");
        }
        Ok(())
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            mode: self.run.mode,
            fail_fast_on_critical: self.run.fail_fast_on_critical,
            max_cost_budget: self.run.max_cost_budget,
            force_refresh: self.run.force_refresh,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default()
            .with_agent_timeout(Duration::from_secs(self.scheduler.agent_timeout_secs))
            .with_max_retries(self.scheduler.max_retries);
        if let Some(max) = self.scheduler.max_parallel {
            config = config.with_max_parallel(max);
        }
        config
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            dispute_threshold: self.facts.dispute_threshold,
            minor_threshold: self.facts.minor_threshold,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_hours * 3600)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.facts.dispute_threshold) {
            warnings.push(format!(
                "dispute_threshold {} should be a fraction between 0 and 1",
                self.facts.dispute_threshold
            ));
        }
        if self.facts.minor_threshold > self.facts.dispute_threshold {
            warnings.push("minor_threshold is larger than dispute_threshold".to_string());
        }
        if self.run.max_cost_budget.is_some_and(|b| b <= 0.0) {
            warnings.push("max_cost_budget must be positive".to_string());
        }

        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                warnings.push(format!("Agent '{}' is declared more than once", agent.name));
            }
        }
        for agent in &self.agents {
            for dep in &agent.depends_on {
                if !seen.contains(dep.as_str()) {
                    warnings.push(format!(
                        "Agent '{}' depends on unknown agent '{}'",
                        agent.name, dep
                    ));
                }
            }
        }
        for rule in &self.warnings.rules {
            if !seen.contains(rule.agent_name.as_str()) {
                warnings.push(format!(
                    "Warning rule '{}' targets unknown agent '{}'",
                    rule.id(),
                    rule.agent_name
                ));
            }
            if let Err(e) = rule.validate() {
                warnings.push(e.to_string());
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warnings::{Condition, Severity};
    use std::collections::HashMap;
    use tempfile::tempdir;

    const FULL: &str = r#"
        [run]
        mode = "lite"
        fail_fast_on_critical = true
        max_cost_budget = 12.5

        [scheduler]
        agent_timeout_secs = 30
        max_parallel = 2

        [facts]
        dispute_threshold = 0.25

        [[agents]]
        name = "extractor"
        phase = "extraction"
        command = "echo '{}'"

        [[agents]]
        name = "financials"
        phase = "analysis"
        command = "./financials.sh"
        depends_on = ["extractor"]
        required = true
        env = { MODEL = "small" }

        [[warnings.rules]]
        agent = "financials"
        field = "runway_months"
        condition = "below"
        threshold = 6
        severity = "critical"
        category = "financial"
    "#;

    #[test]
    fn test_defaults() {
        let config = EngineToml::default();
        assert_eq!(config.run.mode, RunMode::Full);
        assert_eq!(config.scheduler.agent_timeout_secs, 120);
        assert_eq!(config.checkpoints.retention, 10);
        assert!(config.cache.enabled);
        assert_eq!(config.cache_ttl(), Duration::from_secs(24 * 3600));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = EngineToml::parse(FULL).unwrap();
        assert_eq!(config.run.mode, RunMode::Lite);
        assert_eq!(config.run.max_cost_budget, Some(12.5));
        assert_eq!(config.facts.dispute_threshold, 0.25);
        assert_eq!(config.facts.minor_threshold, 0.10);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[1].env["MODEL"], "small");

        let spec = config.agents[1].spec();
        assert!(spec.required);
        assert_eq!(spec.depends_on, vec!["extractor"]);

        let rule = &config.warnings.rules[0];
        assert_eq!(rule.condition, Condition::Below);
        assert_eq!(rule.severity, Severity::Critical);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.agent_timeout, Duration::from_secs(30));
        assert_eq!(scheduler.max_parallel, Some(2));

        let run = config.run_config();
        assert!(run.fail_fast_on_critical);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_error_has_context() {
        let err = EngineToml::parse("[run]\nmode = 3").unwrap_err();
        assert!(err.to_string().contains("engine.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DEAL_ENGINE_MAX_COST", "3.5"),
            ("DEAL_ENGINE_MODE", "express"),
            ("DEAL_ENGINE_FAIL_FAST", "true"),
        ]);
        let mut config = EngineToml::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.run.max_cost_budget, Some(3.5));
        assert_eq!(config.run.mode, RunMode::Express);
        assert!(config.run.fail_fast_on_critical);

        let mut bad = EngineToml::default();
        assert!(bad
            .apply_env_from(|k| (k == "DEAL_ENGINE_MAX_COST").then(|| "lots".to_string()))
            .is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = EngineToml::parse(FULL).unwrap();
        config.agents[1].depends_on.push("ghost".to_string());
        config.warnings.rules[0].agent_name = "nobody".to_string();
        config.facts.minor_threshold = 0.5;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("ghost")));
        assert!(warnings.iter().any(|w| w.contains("nobody")));
        assert!(warnings.iter().any(|w| w.contains("minor_threshold")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let config = EngineToml::parse(FULL).unwrap();
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();
        let loaded = EngineToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);

        let empty = tempdir().unwrap();
        assert_eq!(
            EngineToml::load_or_default(empty.path()).unwrap(),
            EngineToml::default()
        );
    }

    #[test]
    fn test_starter_config_is_valid() {
        let toml = EngineToml::parse(STARTER_CONFIG).unwrap();
        assert_eq!(toml.agents.len(), 3);
        assert_eq!(toml.warnings.rules.len(), 1);
        assert!(toml.validate().is_empty(), "{:?}", toml.validate());
    }
}
