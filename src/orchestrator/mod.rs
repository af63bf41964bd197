//! Top-level control flow: run, resume and recover analysis sessions.

pub mod context;
pub mod report;
pub mod runner;

pub use context::{DEFAULT_CACHE_TTL, RunConfig, RunContext};
pub use report::RunReport;
pub use runner::Orchestrator;
