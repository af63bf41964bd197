//! Fact ledger commands: `deal-engine facts` and `deal-engine resolve`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;

use deal_engine::facts::{FactSource, FactStore, MatchOutcome, NewFact};

use super::super::FactsCommands;
use crate::Cli;

fn open_facts(cli: &Cli, project_dir: PathBuf) -> Result<FactStore> {
    let config = super::load_config(cli, project_dir)?;
    let store = config.open_store()?;
    Ok(FactStore::new(store, config.toml.match_policy()))
}

pub async fn cmd_facts(cli: &Cli, project_dir: PathBuf, command: FactsCommands) -> Result<()> {
    let facts = open_facts(cli, project_dir)?;

    match command {
        FactsCommands::List {
            subject_id,
            disputed,
            json,
        } => {
            let current = facts
                .current(&subject_id)
                .await
                .with_context(|| format!("Failed to load facts for '{}'", subject_id))?;
            let current: Vec<_> = current
                .into_iter()
                .filter(|f| !disputed || f.is_disputed)
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&current)?);
                return Ok(());
            }
            if current.is_empty() {
                println!("No facts for '{}'.", subject_id);
                return Ok(());
            }
            for fact in current {
                let marker = if fact.is_disputed {
                    style("DISPUTED").red().bold().to_string()
                } else {
                    String::new()
                };
                let unit = fact.unit.as_deref().unwrap_or("");
                println!(
                    "{:<32} {} {}  [{} {}%] {}",
                    fact.fact_key,
                    style(&fact.display_value).bold(),
                    unit,
                    fact.current_source,
                    fact.current_confidence,
                    marker
                );
                for detail in &fact.dispute_details {
                    println!(
                        "    {} {} from {} ({}%)",
                        style("vs").dim(),
                        detail.value,
                        detail.source,
                        detail.confidence
                    );
                }
            }
        }
        FactsCommands::History { subject_id, key } => {
            let events = facts.history(&subject_id, &key).await?;
            if events.is_empty() {
                println!("No events for '{}' on '{}'.", key, subject_id);
                return Ok(());
            }
            for event in events {
                println!(
                    "{}  {:<10} {:<24} {}  by {}  ({})",
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type.as_str(),
                    event.display_value,
                    event.source,
                    event.created_by,
                    style(event.id).dim()
                );
            }
        }
        FactsCommands::Submit {
            subject_id,
            key,
            value,
            source,
            confidence,
            unit,
            actor,
        } => {
            let mut fact =
                NewFact::new(&key, super::parse_value(&value), source).with_confidence(confidence);
            if let Some(unit) = &unit {
                fact = fact.with_unit(unit);
            }
            let submission = facts
                .submit(&subject_id, fact, &actor)
                .await
                .context("Failed to submit fact")?;
            match &submission.outcome {
                MatchOutcome::ReviewNeeded { existing, class, .. } => println!(
                    "{} {} conflicts with {} ({:?}); run `deal-engine resolve` to settle it",
                    style("Disputed:").yellow().bold(),
                    key,
                    existing.display_value,
                    class
                ),
                outcome => println!("{}: {}", outcome.label(), key),
            }
        }
        FactsCommands::Delete {
            subject_id,
            event_id,
            actor,
        } => {
            let marker = facts
                .delete(&subject_id, event_id, &actor)
                .await
                .with_context(|| format!("Failed to delete event {}", event_id))?;
            println!("Deleted {} ({})", event_id, marker.fact_key);
        }
    }

    Ok(())
}

pub async fn cmd_resolve(
    cli: &Cli,
    project_dir: PathBuf,
    subject_id: &str,
    key: &str,
    value: &str,
    source: FactSource,
    actor: &str,
) -> Result<()> {
    let facts = open_facts(cli, project_dir)?;
    let event = facts
        .resolve(subject_id, key, super::parse_value(value), source, actor)
        .await
        .with_context(|| format!("Failed to resolve '{}'", key))?;
    println!(
        "Resolved {} = {} ({})",
        key,
        style(&event.display_value).bold(),
        event.source
    );
    Ok(())
}
