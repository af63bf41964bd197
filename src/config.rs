use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{AgentRegistry, CommandAgent, CommandEnrichment, EnrichmentProvider};
use crate::engine_config::{CONFIG_FILE, EngineToml};
use crate::orchestrator::RunContext;
use crate::storage::SqliteStore;
use crate::warnings::EarlyWarningEvaluator;

/// Directory under the project root that holds engine state.
pub const ENGINE_DIR: &str = ".deal-engine";

/// Runtime configuration for the engine.
///
/// Bridges `engine.toml` with the paths and collaborators a CLI command
/// needs. Environment overrides are already applied to `toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub engine_dir: PathBuf,
    pub config_file: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub toml: EngineToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Project directory not found: {}", project_dir.display()))?;
        let engine_dir = project_dir.join(ENGINE_DIR);

        let mut toml = EngineToml::load_or_default(&engine_dir)?;
        toml.apply_env()?;

        Ok(Self {
            config_file: engine_dir.join(CONFIG_FILE),
            db_path: engine_dir.join("engine.db"),
            log_dir: engine_dir.join("logs"),
            engine_dir,
            project_dir,
            verbose,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.engine_dir).context("Failed to create engine directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// One command agent per `[[agents]]` entry, run from the project root.
    pub fn registry(&self) -> Result<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for def in &self.toml.agents {
            let agent = CommandAgent::new(def.spec(), &def.command, &self.project_dir)
                .with_env(def.env.clone());
            registry
                .register(Arc::new(agent))
                .with_context(|| format!("Failed to register agent '{}'", def.name))?;
        }
        Ok(registry)
    }

    pub fn evaluator(&self) -> Result<EarlyWarningEvaluator> {
        EarlyWarningEvaluator::new(self.toml.warnings.rules.clone())
            .context("Invalid warning rule in engine.toml")
    }

    pub fn enrichment(&self) -> Option<Arc<dyn EnrichmentProvider>> {
        self.toml.enrichment.as_ref().map(|section| {
            Arc::new(CommandEnrichment::new(
                &section.command,
                &self.project_dir,
                section.timeout_secs,
            )) as Arc<dyn EnrichmentProvider>
        })
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        self.ensure_directories()?;
        let store = SqliteStore::open(&self.db_path)
            .with_context(|| format!("Failed to open database: {}", self.db_path.display()))?;
        Ok(Arc::new(store))
    }

    /// Assemble a run context backed by the project database.
    pub fn run_context(&self) -> Result<RunContext> {
        let store = self.open_store()?;
        let mut ctx = RunContext::with_store(self.registry()?, store, self.toml.match_policy())
            .with_evaluator(self.evaluator()?)
            .with_scheduler(self.toml.scheduler_config())
            .with_cache_ttl(self.toml.cache_ttl())
            .with_checkpoint_retention(self.toml.checkpoints.retention);
        if !self.toml.cache.enabled {
            ctx = ctx.without_cache();
        }
        if let Some(enrichment) = self.enrichment() {
            ctx = ctx.with_enrichment(enrichment);
        }
        Ok(ctx)
    }
}
