//! Analysis execution: `deal-engine run` and `deal-engine resume`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use deal_engine::lifecycle::PhaseState;
use deal_engine::orchestrator::{Orchestrator, RunConfig, RunReport};
use deal_engine::progress::TracingObserver;
use deal_engine::session::{RunMode, Subject};
use deal_engine::ui::{TerminalProgress, UiMode};

use crate::Cli;

/// CLI flags layered over `[run]` from engine.toml.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub mode: Option<RunMode>,
    pub fail_fast: bool,
    pub max_cost: Option<f64>,
    pub force_refresh: bool,
}

impl RunOverrides {
    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.fail_fast {
            config.fail_fast_on_critical = true;
        }
        if let Some(budget) = self.max_cost {
            config.max_cost_budget = Some(budget);
        }
        if self.force_refresh {
            config.force_refresh = true;
        }
        config
    }
}

pub fn build_subject(
    subject_id: &str,
    name: Option<&str>,
    attributes: Option<&str>,
    attributes_file: Option<&Path>,
) -> Result<Subject> {
    let raw = match (attributes, attributes_file) {
        (Some(inline), _) => Some(inline.to_string()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read attributes file: {}", path.display()))?,
        ),
        (None, None) => None,
    };
    let subject = Subject::new(subject_id, name.unwrap_or(subject_id));
    match raw {
        Some(raw) => {
            let attributes: serde_json::Value =
                serde_json::from_str(&raw).context("Subject attributes must be valid JSON")?;
            Ok(subject.with_attributes(attributes))
        }
        None => Ok(subject),
    }
}

fn build_orchestrator(
    cli: &Cli,
    project_dir: PathBuf,
    ui: &str,
) -> Result<(Orchestrator, Arc<TerminalProgress>, RunConfig)> {
    let config = super::load_config(cli, project_dir)?;
    for warning in config.toml.validate() {
        tracing::warn!("engine.toml: {}", warning);
    }

    let mode: UiMode = ui.parse().unwrap_or_default();
    let progress = Arc::new(TerminalProgress::new(mode, cli.verbose));
    let ctx = config
        .run_context()?
        .with_observer(progress.clone())
        .with_observer(Arc::new(TracingObserver));
    if ctx.registry.is_empty() {
        anyhow::bail!("No agents configured. Add [[agents]] entries to engine.toml.");
    }

    Ok((Orchestrator::new(ctx), progress, config.toml.run_config()))
}

fn exit_status(report: &RunReport) -> Result<()> {
    if report.final_state == PhaseState::Failed {
        anyhow::bail!("Session {} failed: {}", report.session_id, report.termination);
    }
    Ok(())
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    subject: Subject,
    overrides: RunOverrides,
    ui: &str,
) -> Result<()> {
    let (orchestrator, progress, base) = build_orchestrator(cli, project_dir, ui)?;
    let run_config = overrides.apply(base);

    let report = orchestrator
        .run_analysis(subject, &run_config)
        .await
        .context("Analysis run aborted")?;
    progress.finish(&report);
    exit_status(&report)
}

pub async fn cmd_resume(
    cli: &Cli,
    project_dir: PathBuf,
    session_id: Option<Uuid>,
    ui: &str,
) -> Result<()> {
    let (orchestrator, progress, run_config) = build_orchestrator(cli, project_dir, ui)?;

    let reports = match session_id {
        Some(id) => vec![
            orchestrator
                .resume_session(id, &run_config)
                .await
                .with_context(|| format!("Failed to resume session {}", id))?,
        ],
        None => orchestrator
            .recover_all(&run_config)
            .await
            .context("Recovery sweep aborted")?,
    };

    if reports.is_empty() {
        println!("No interrupted sessions to resume.");
        return Ok(());
    }
    for report in &reports {
        progress.finish(report);
    }
    reports.iter().try_for_each(exit_status)
}
