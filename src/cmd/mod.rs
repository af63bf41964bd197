//! CLI command implementations.
//!
//! | Module        | Commands handled                  |
//! |---------------|-----------------------------------|
//! | `init`        | `Init`                            |
//! | `run`         | `Run`, `Resume`                   |
//! | `sessions`    | `Sessions`, `Checkpoints`         |
//! | `facts`       | `Facts`, `Resolve`                |
//! | `config`      | `Config`                          |

pub mod config;
pub mod facts;
pub mod init;
pub mod run;
pub mod sessions;

pub use config::cmd_config;
pub use facts::{cmd_facts, cmd_resolve};
pub use init::cmd_init;
pub use run::{cmd_resume, cmd_run};
pub use sessions::{cmd_checkpoints, cmd_sessions};

use anyhow::Result;
use std::path::PathBuf;

use deal_engine::config::Config;

use crate::Cli;

/// Load the project config, failing with a hint when `init` has not run.
pub(crate) fn load_config(cli: &Cli, project_dir: PathBuf) -> Result<Config> {
    let config = Config::new(project_dir, cli.verbose)?;
    if !config.is_initialized() {
        anyhow::bail!(
            "No engine.toml found in {}. Run `deal-engine init` first.",
            config.engine_dir.display()
        );
    }
    Ok(config)
}

/// Parse a CLI value as JSON, falling back to a plain string.
pub(crate) fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
