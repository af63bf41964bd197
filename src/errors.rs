//! Typed error hierarchy for the deal engine.
//!
//! Four top-level enums cover the subsystems:
//! - `OrchestratorError` - run-level failures, including the fatal class
//! - `FactStoreError` - fact ledger writes and lifecycle events
//! - `RecoveryError` - checkpoint restore failures
//! - `StorageError` - persistence backend failures
//!
//! Agent failures are not errors at this level: they are captured as
//! [`crate::agent::AgentError`] inside an `AgentResult`.

use crate::lifecycle::PhaseState;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Storage task panicked: {0}")]
    TaskPanicked(String),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Fact event {0} already exists")]
    DuplicateEvent(Uuid),

    #[error("Invalid stored value in column '{column}': {message}")]
    InvalidColumn { column: String, message: String },
}

/// Errors from the fact store.
#[derive(Debug, Error)]
pub enum FactStoreError {
    #[error("Fact key must not be empty")]
    EmptyKey,

    #[error("Source confidence {0} is out of range (0-100)")]
    ConfidenceOutOfRange(u8),

    #[error("Fact event {0} not found")]
    EventNotFound(Uuid),

    #[error("Fact event {0} is already deleted")]
    AlreadyDeleted(Uuid),

    #[error("No current fact for key '{key}' on subject {subject_id}")]
    NoCurrentFact { subject_id: String, key: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from checkpoint recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("No checkpoint exists for interrupted session {0}")]
    NoCheckpoint(Uuid),

    #[error("Session {0} is already terminal ({1})")]
    AlreadyTerminal(Uuid, PhaseState),

    #[error("Checkpoint for session {session_id} is invalid: {message}")]
    InvalidCheckpoint { session_id: Uuid, message: String },

    #[error(
        "Checkpoint for session {session_id} references agents that are no longer registered: {agents:?}"
    )]
    SchemaDrift {
        session_id: Uuid,
        agents: Vec<String>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the orchestrator (run and resume entry points).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid phase transition from {from} to {to} ({trigger})")]
    InvalidTransition {
        from: PhaseState,
        to: PhaseState,
        trigger: String,
    },

    #[error("Agent '{0}' is registered twice")]
    DuplicateAgent(String),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Facts(#[from] FactStoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Programming or integration errors that must abort the process rather
    /// than be folded into a run summary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::DuplicateAgent(_)
                | Self::Recovery(RecoveryError::SchemaDrift { .. })
        )
    }
}
