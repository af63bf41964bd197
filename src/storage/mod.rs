//! Persistence seams.
//!
//! The engine talks to storage only through the traits below. Two backends
//! implement all of them: [`MemoryStore`] for tests and ephemeral runs, and
//! [`SqliteStore`] for the CLI.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{DbHandle, SqliteStore};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentResult;
use crate::checkpoint::Checkpoint;
use crate::errors::StorageError;
use crate::facts::FactEvent;
use crate::lifecycle::TransitionRecord;
use crate::session::{AnalysisSession, RunMode, RunSummary};

/// Append-only fact ledger.
#[async_trait]
pub trait FactRepository: Send + Sync {
    /// Append events atomically. Either all are visible to later loads or
    /// none are.
    async fn append_events(&self, events: &[FactEvent]) -> Result<(), StorageError>;

    /// Every event for a subject, in append order.
    async fn load_events(&self, subject_id: &str) -> Result<Vec<FactEvent>, StorageError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &AnalysisSession) -> Result<(), StorageError>;

    async fn update_session(&self, session: &AnalysisSession) -> Result<(), StorageError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<AnalysisSession>, StorageError>;

    /// All sessions, newest first.
    async fn list_sessions(&self) -> Result<Vec<AnalysisSession>, StorageError>;

    /// Persist a transition and move the session's phase state with it.
    async fn record_transition(&self, record: &TransitionRecord) -> Result<(), StorageError>;

    /// Transitions for a session, oldest first.
    async fn list_transitions(&self, session_id: Uuid)
    -> Result<Vec<TransitionRecord>, StorageError>;
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    async fn latest_checkpoint(&self, session_id: Uuid)
    -> Result<Option<Checkpoint>, StorageError>;

    /// Checkpoints for a session, newest first.
    async fn list_checkpoints(&self, session_id: Uuid) -> Result<Vec<Checkpoint>, StorageError>;

    /// Keep only the `keep` newest checkpoints. Returns how many were removed.
    async fn prune_checkpoints(&self, session_id: Uuid, keep: usize)
    -> Result<usize, StorageError>;
}

/// A finished run kept for reuse by identical subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRun {
    pub fingerprint: String,
    pub mode: RunMode,
    pub session_id: Uuid,
    pub summary: RunSummary,
    pub results: BTreeMap<String, AgentResult>,
    pub stored_at: DateTime<Utc>,
}

impl CachedRun {
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.to_std().map(|a| a <= max_age).unwrap_or(true)
    }
}

#[async_trait]
pub trait RunCache: Send + Sync {
    /// Newest cached run for the fingerprint and mode, if not older than
    /// `max_age`.
    async fn lookup(
        &self,
        fingerprint: &str,
        mode: RunMode,
        max_age: Duration,
    ) -> Result<Option<CachedRun>, StorageError>;

    async fn store(&self, run: &CachedRun) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TerminationReason;

    #[test]
    fn test_cached_run_freshness() {
        let now = Utc::now();
        let run = CachedRun {
            fingerprint: "f".into(),
            mode: RunMode::Full,
            session_id: Uuid::new_v4(),
            summary: RunSummary {
                success: true,
                termination: TerminationReason::Completed,
                succeeded: vec![],
                failed: vec![],
                critical_warnings: 0,
                high_warnings: 0,
                contradictions: 0,
                total_cost: 0.0,
                duration_ms: 0,
            },
            results: BTreeMap::new(),
            stored_at: now - chrono::Duration::hours(2),
        };
        assert!(run.is_fresh(Duration::from_secs(3 * 3600), now));
        assert!(!run.is_fresh(Duration::from_secs(3600), now));
    }
}
