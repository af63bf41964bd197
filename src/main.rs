use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deal_engine::facts::FactSource;
use deal_engine::session::RunMode;
use std::path::PathBuf;
use uuid::Uuid;

mod cmd;

#[derive(Parser)]
#[command(name = "deal-engine")]
#[command(version, about = "Phased multi-agent deal analysis over an event-sourced fact store")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .deal-engine/ with a starter engine.toml
    Init {
        /// Overwrite an existing engine.toml
        #[arg(long)]
        force: bool,
    },
    /// Analyse a subject with the configured agents
    Run {
        /// Stable subject identifier (facts are keyed by it)
        subject_id: String,

        /// Display name, defaults to the subject id
        #[arg(long)]
        name: Option<String>,

        /// Subject attributes as a JSON object
        #[arg(long)]
        attributes: Option<String>,

        /// Read subject attributes from a JSON file
        #[arg(long, conflicts_with = "attributes")]
        attributes_file: Option<PathBuf>,

        /// full, lite or express. Overrides engine.toml
        #[arg(short, long)]
        mode: Option<RunMode>,

        /// Halt on the first critical rule warning
        #[arg(long)]
        fail_fast: bool,

        /// Stop scheduling batches once this much has been spent
        #[arg(long)]
        max_cost: Option<f64>,

        /// Ignore cached results for this subject
        #[arg(long)]
        force_refresh: bool,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Resume an interrupted session from its latest checkpoint
    Resume {
        /// Session to resume. Without it every interrupted session is resumed
        session_id: Option<Uuid>,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Inspect recorded sessions
    Sessions {
        #[command(subcommand)]
        command: Option<SessionsCommands>,
    },
    /// List the checkpoints kept for a session
    Checkpoints { session_id: Uuid },
    /// Query and edit the fact ledger
    Facts {
        #[command(subcommand)]
        command: FactsCommands,
    },
    /// Settle a disputed fact with an accepted value
    Resolve {
        subject_id: String,
        key: String,
        /// JSON value; bare words are taken as strings
        value: String,

        #[arg(long, default_value = "human")]
        source: FactSource,

        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    /// List sessions, newest first
    List {
        /// Only sessions that have not finished
        #[arg(long)]
        active: bool,
    },
    /// Show one session with its phase transitions
    Show { id: Uuid },
}

#[derive(Subcommand, Clone)]
pub enum FactsCommands {
    /// Current consolidated facts for a subject
    List {
        subject_id: String,
        /// Only disputed keys
        #[arg(long)]
        disputed: bool,
        #[arg(long)]
        json: bool,
    },
    /// Every event recorded for one key
    History { subject_id: String, key: String },
    /// Submit a claim through the matcher
    Submit {
        subject_id: String,
        key: String,
        /// JSON value; bare words are taken as strings
        value: String,

        #[arg(long, default_value = "human")]
        source: FactSource,

        #[arg(long, default_value = "100")]
        confidence: u8,

        #[arg(long)]
        unit: Option<String>,

        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Retract a fact event
    Delete {
        subject_id: String,
        event_id: Uuid,

        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default engine.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(deal_engine::config::ENGINE_DIR).join("logs");
    let log_dir = log_dir.parent().is_some_and(|p| p.exists()).then_some(log_dir);
    let _guard = deal_engine::telemetry::init_tracing(cli.verbose, cli.json_logs, log_dir.as_deref());

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force)?,
        Commands::Run {
            subject_id,
            name,
            attributes,
            attributes_file,
            mode,
            fail_fast,
            max_cost,
            force_refresh,
            ui,
        } => {
            let subject = cmd::run::build_subject(
                subject_id,
                name.as_deref(),
                attributes.as_deref(),
                attributes_file.as_deref(),
            )?;
            let overrides = cmd::run::RunOverrides {
                mode: *mode,
                fail_fast: *fail_fast,
                max_cost: *max_cost,
                force_refresh: *force_refresh,
            };
            cmd::cmd_run(&cli, project_dir, subject, overrides, ui).await?;
        }
        Commands::Resume { session_id, ui } => {
            cmd::cmd_resume(&cli, project_dir, *session_id, ui).await?
        }
        Commands::Sessions { command } => cmd::cmd_sessions(&cli, project_dir, command.clone()).await?,
        Commands::Checkpoints { session_id } => {
            cmd::cmd_checkpoints(&cli, project_dir, *session_id).await?
        }
        Commands::Facts { command } => cmd::cmd_facts(&cli, project_dir, command.clone()).await?,
        Commands::Resolve {
            subject_id,
            key,
            value,
            source,
            actor,
        } => cmd::cmd_resolve(&cli, project_dir, subject_id, key, value, *source, actor).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
