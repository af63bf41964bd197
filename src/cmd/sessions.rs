//! Session and checkpoint inspection: `deal-engine sessions`, `deal-engine checkpoints`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use uuid::Uuid;

use deal_engine::checkpoint::CheckpointManager;
use deal_engine::storage::SessionRepository;

use super::super::SessionsCommands;
use crate::Cli;

pub async fn cmd_sessions(
    cli: &Cli,
    project_dir: PathBuf,
    command: Option<SessionsCommands>,
) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let store = config.open_store()?;

    match command.unwrap_or(SessionsCommands::List { active: false }) {
        SessionsCommands::List { active } => {
            let sessions = store.list_sessions().await.context("Failed to list sessions")?;
            let sessions: Vec<_> = sessions
                .into_iter()
                .filter(|s| !active || !s.is_terminal())
                .collect();
            if sessions.is_empty() {
                println!("No sessions recorded.");
                return Ok(());
            }
            for session in sessions {
                let state = if session.is_terminal() {
                    style(session.phase_state.to_string()).dim()
                } else {
                    style(session.phase_state.to_string()).yellow()
                };
                println!(
                    "{}  {:<10} {:<7} {:>7}  ${:.2}  {}  {}",
                    session.id,
                    state,
                    session.mode,
                    session.progress_label(),
                    session.total_cost,
                    session.started_at.format("%Y-%m-%d %H:%M"),
                    session.subject_id
                );
            }
        }
        SessionsCommands::Show { id } => {
            let session = store
                .get_session(id)
                .await?
                .with_context(|| format!("Session {} not found", id))?;
            println!("Session {}", style(session.id).bold());
            println!("  subject:  {} ({})", session.subject.name, session.subject_id);
            println!("  mode:     {}", session.mode);
            println!("  state:    {}", session.phase_state);
            println!("  agents:   {}", session.progress_label());
            println!("  cost:     ${:.2}", session.total_cost);
            println!("  started:  {}", session.started_at.to_rfc3339());
            if let Some(done) = session.completed_at {
                println!("  finished: {}", done.to_rfc3339());
            }
            if let Some(summary) = &session.summary {
                println!("  outcome:  {}", summary.termination);
                println!(
                    "  warnings: {} critical, {} high; {} contradictions",
                    summary.critical_warnings, summary.high_warnings, summary.contradictions
                );
                if !summary.failed.is_empty() {
                    println!("  failed:   {}", summary.failed.join(", "));
                }
            }
            if let Some(reason) = &session.failure_reason {
                println!("  reason:   {}", style(reason).red());
            }

            let transitions = store.list_transitions(id).await?;
            if !transitions.is_empty() {
                println!();
                println!("Transitions:");
                for t in transitions {
                    println!(
                        "  {}  {} -> {}  {}",
                        t.at.format("%H:%M:%S"),
                        t.from,
                        t.to,
                        style(&t.trigger).dim()
                    );
                }
            }
        }
    }

    Ok(())
}

pub async fn cmd_checkpoints(cli: &Cli, project_dir: PathBuf, session_id: Uuid) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let manager = CheckpointManager::new(config.open_store()?)
        .with_retention(config.toml.checkpoints.retention);

    let checkpoints = manager
        .list(session_id)
        .await
        .with_context(|| format!("Failed to list checkpoints for {}", session_id))?;
    if checkpoints.is_empty() {
        println!("No checkpoints for session {}.", session_id);
        return Ok(());
    }

    println!(
        "{} checkpoints for {} (retention {})",
        checkpoints.len(),
        session_id,
        manager.retention()
    );
    for cp in checkpoints {
        println!(
            "  {}  {:<10} batch {:>2}  done {:>2}  failed {:>2}  pending {:>2}  ${:.2}",
            cp.created_at.format("%Y-%m-%d %H:%M:%S"),
            cp.state,
            cp.batch_index,
            cp.completed_agents.len(),
            cp.failed_agents.len(),
            cp.pending_agents.len(),
            cp.total_cost
        );
    }
    Ok(())
}
