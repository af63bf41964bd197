pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod engine_config;
pub mod errors;
pub mod facts;
pub mod lifecycle;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod ui;
pub mod warnings;

pub use errors::{FactStoreError, OrchestratorError, RecoveryError, StorageError};
pub use orchestrator::{Orchestrator, RunConfig, RunContext, RunReport};
