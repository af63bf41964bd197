//! Project initialisation: `deal-engine init`.

use anyhow::{Context, Result};
use std::path::Path;

use deal_engine::config::ENGINE_DIR;
use deal_engine::engine_config::{CONFIG_FILE, STARTER_CONFIG};

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    let engine_dir = project_dir.join(ENGINE_DIR);
    let config_path = engine_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        println!(
            "deal-engine already initialized at {}",
            engine_dir.display()
        );
        println!("Use --force to overwrite engine.toml.");
        return Ok(());
    }

    std::fs::create_dir_all(engine_dir.join("logs"))
        .with_context(|| format!("Failed to create {}", engine_dir.display()))?;
    std::fs::write(&config_path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Initialized deal-engine at {}", engine_dir.display());
    println!();
    println!("  .deal-engine/");
    println!("  ├── engine.toml   # agents, warning rules, run defaults");
    println!("  ├── engine.db     # fact ledger, sessions, checkpoints (created on first run)");
    println!("  └── logs/         # daily rolling logs");
    println!();
    println!("Next steps:");
    println!("  1. Replace the sample [[agents]] with your own commands");
    println!("  2. Run `deal-engine run <subject-id>`");

    Ok(())
}
