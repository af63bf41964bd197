//! Dependency-aware batch scheduling for agents.
//!
//! Agents declare the agents they depend on. Within a phase the scheduler
//! groups them into batches: every agent in a batch has all of its
//! dependencies in earlier batches (or in earlier phases), and batches run
//! strictly one after another while the agents inside a batch run
//! concurrently.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs the agent graph and records unresolved edges
//! 2. **Scheduler** - Plans batches, degrading to a fallback batch on cycles
//! 3. **Executor** - Runs one batch with per-agent timeouts and isolation
//! 4. **State** - The write-once result map and batch reports
//!
//! ## Example
//!
//! ```no_run
//! use deal_engine::agent::AgentSpec;
//! use deal_engine::dag::{DagBuilder, DagScheduler};
//! use deal_engine::lifecycle::AnalysisPhase;
//!
//! # fn example() -> Result<(), deal_engine::errors::OrchestratorError> {
//! let agents = vec![
//!     AgentSpec::new("financials", AnalysisPhase::Analysis),
//!     AgentSpec::new("market", AnalysisPhase::Analysis),
//!     AgentSpec::new("scoring", AnalysisPhase::Analysis).depends_on(&["financials", "market"]),
//! ];
//!
//! let graph = DagBuilder::new(agents).build()?;
//! let plan = DagScheduler::new(graph).plan(0);
//! // Batch 0: [financials, market]
//! // Batch 1: [scoring]
//! assert_eq!(plan.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod executor;
pub mod scheduler;
pub mod state;

pub use builder::{AgentGraph, DagBuilder, UnresolvedDependency};
pub use executor::BatchExecutor;
pub use scheduler::{Batch, BatchKind, DagScheduler, ExecutionPlan, SchedulerConfig};
pub use state::{BatchReport, RunState};
