//! Configuration view and validation commands: `deal-engine config`.

use anyhow::Result;
use std::path::Path;

use deal_engine::config::ENGINE_DIR;
use deal_engine::engine_config::{CONFIG_FILE, EngineToml};

use super::super::ConfigCommands;

fn print_effective(toml: &EngineToml) {
    println!("[run]");
    println!("  mode = \"{}\"", toml.run.mode);
    println!("  fail_fast_on_critical = {}", toml.run.fail_fast_on_critical);
    match toml.run.max_cost_budget {
        Some(budget) => println!("  max_cost_budget = {}", budget),
        None => println!("  max_cost_budget = (unlimited)"),
    }
    println!();
    println!("[scheduler]");
    println!("  agent_timeout_secs = {}", toml.scheduler.agent_timeout_secs);
    match toml.scheduler.max_parallel {
        Some(max) => println!("  max_parallel = {}", max),
        None => println!("  max_parallel = (batch width)"),
    }
    println!("  max_retries = {}", toml.scheduler.max_retries);
    println!();
    println!("[facts]");
    println!("  dispute_threshold = {}", toml.facts.dispute_threshold);
    println!("  minor_threshold = {}", toml.facts.minor_threshold);
    println!();
    println!("[checkpoints]");
    println!("  retention = {}", toml.checkpoints.retention);
    println!();
    println!("[cache]");
    println!("  enabled = {}", toml.cache.enabled);
    println!("  ttl_hours = {}", toml.cache.ttl_hours);
    println!();

    if let Some(enrichment) = &toml.enrichment {
        println!("[enrichment]");
        println!("  command = \"{}\"", enrichment.command);
        println!("  timeout_secs = {}", enrichment.timeout_secs);
        println!();
    }

    println!("Agents ({}):", toml.agents.len());
    for agent in &toml.agents {
        let required = if agent.required { " required" } else { "" };
        if agent.depends_on.is_empty() {
            println!("  {:<20} {}{}", agent.name, agent.phase.as_str(), required);
        } else {
            println!(
                "  {:<20} {}{}  after {}",
                agent.name,
                agent.phase.as_str(),
                required,
                agent.depends_on.join(", ")
            );
        }
    }
    println!();
    println!("Warning rules ({}):", toml.warnings.rules.len());
    for rule in &toml.warnings.rules {
        println!("  {:<40} {}", rule.id(), rule.severity);
    }
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let engine_dir = project_dir.join(ENGINE_DIR);
    let config_path = engine_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No engine.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include environment overrides.
            let mut toml = EngineToml::load_or_default(&engine_dir)?;
            toml.apply_env()?;
            print_effective(&toml);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No engine.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = EngineToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("engine.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&engine_dir)?;
            EngineToml::default().save(&config_path)?;

            println!("Created engine.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [run] mode, fail_fast_on_critical, max_cost_budget");
            println!("  - [[agents]] name, phase, command, depends_on");
            println!("  - [[warnings.rules]] agent, field, condition, threshold, severity");
            println!();
        }
    }

    Ok(())
}
