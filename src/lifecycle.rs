//! Phase state machine for an analysis session.
//!
//! ```text
//! INIT -> EXTRACTION -> GATHERING -> ANALYSIS -> DEBATE -> SYNTHESIS -> COMPLETED
//!                  \___________________^     \____________^
//! ```
//!
//! FAILED is reachable from every non-terminal state, as is COMPLETED (an
//! early halt finishes the lifecycle without running the remaining phases).
//! Each transition is validated, applied, persisted as a
//! [`TransitionRecord`] and broadcast to observers, in that order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::progress::RunObserver;
use crate::session::RunMode;
use crate::storage::SessionRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    Init,
    Extraction,
    Gathering,
    Analysis,
    Debate,
    Synthesis,
    Completed,
    Failed,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Extraction => "EXTRACTION",
            Self::Gathering => "GATHERING",
            Self::Analysis => "ANALYSIS",
            Self::Debate => "DEBATE",
            Self::Synthesis => "SYNTHESIS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The allowed-transition table.
    pub fn can_transition_to(&self, to: PhaseState) -> bool {
        use PhaseState::*;
        if self.is_terminal() {
            return false;
        }
        match (*self, to) {
            (_, Failed) | (_, Completed) => true,
            (Init, Extraction) => true,
            (Extraction, Gathering) | (Extraction, Analysis) => true,
            (Gathering, Analysis) => true,
            (Analysis, Debate) | (Analysis, Synthesis) => true,
            (Debate, Synthesis) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INIT" => Ok(Self::Init),
            "EXTRACTION" => Ok(Self::Extraction),
            "GATHERING" => Ok(Self::Gathering),
            "ANALYSIS" => Ok(Self::Analysis),
            "DEBATE" => Ok(Self::Debate),
            "SYNTHESIS" => Ok(Self::Synthesis),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => anyhow::bail!("Invalid phase state '{}'", s),
        }
    }
}

/// The working phases agents are assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPhase {
    Extraction,
    Gathering,
    Analysis,
    Debate,
    Synthesis,
}

impl AnalysisPhase {
    pub const ALL: [AnalysisPhase; 5] = [
        Self::Extraction,
        Self::Gathering,
        Self::Analysis,
        Self::Debate,
        Self::Synthesis,
    ];

    pub fn state(&self) -> PhaseState {
        match self {
            Self::Extraction => PhaseState::Extraction,
            Self::Gathering => PhaseState::Gathering,
            Self::Analysis => PhaseState::Analysis,
            Self::Debate => PhaseState::Debate,
            Self::Synthesis => PhaseState::Synthesis,
        }
    }

    pub fn from_state(state: PhaseState) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.state() == state)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Gathering => "gathering",
            Self::Analysis => "analysis",
            Self::Debate => "debate",
            Self::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extraction" => Ok(Self::Extraction),
            "gathering" => Ok(Self::Gathering),
            "analysis" => Ok(Self::Analysis),
            "debate" => Ok(Self::Debate),
            "synthesis" => Ok(Self::Synthesis),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: extraction, gathering, analysis, debate, synthesis",
                s
            ),
        }
    }
}

/// Debate runs only when there is something to argue about.
pub fn should_debate(findings: usize, mode: RunMode) -> bool {
    mode.includes(AnalysisPhase::Debate) && findings > 1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub session_id: Uuid,
    pub from: PhaseState,
    pub to: PhaseState,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

pub struct PhaseMachine {
    session_id: Uuid,
    state: PhaseState,
    sessions: Arc<dyn SessionRepository>,
    observers: Vec<Arc<dyn RunObserver>>,
    history: Vec<TransitionRecord>,
}

impl PhaseMachine {
    pub fn new(session_id: Uuid, sessions: Arc<dyn SessionRepository>) -> Self {
        Self::restore(session_id, PhaseState::Init, sessions)
    }

    /// Rebuild a machine at a checkpointed state. No transition is recorded.
    pub fn restore(
        session_id: Uuid,
        state: PhaseState,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            session_id,
            state,
            sessions,
            observers: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_observers(mut self, observers: Vec<Arc<dyn RunObserver>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Transitions applied by this machine instance.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub async fn start_extraction(&mut self) -> Result<(), OrchestratorError> {
        self.transition(PhaseState::Extraction, "start_extraction")
            .await
    }

    pub async fn start_gathering(&mut self) -> Result<(), OrchestratorError> {
        self.transition(PhaseState::Gathering, "start_gathering")
            .await
    }

    pub async fn start_analysis(&mut self) -> Result<(), OrchestratorError> {
        self.transition(PhaseState::Analysis, "start_analysis").await
    }

    pub async fn start_debate(&mut self) -> Result<(), OrchestratorError> {
        self.transition(PhaseState::Debate, "start_debate").await
    }

    pub async fn start_synthesis(&mut self) -> Result<(), OrchestratorError> {
        self.transition(PhaseState::Synthesis, "start_synthesis")
            .await
    }

    /// Enter a working phase through its named transition.
    pub async fn enter(&mut self, phase: AnalysisPhase) -> Result<(), OrchestratorError> {
        match phase {
            AnalysisPhase::Extraction => self.start_extraction().await,
            AnalysisPhase::Gathering => self.start_gathering().await,
            AnalysisPhase::Analysis => self.start_analysis().await,
            AnalysisPhase::Debate => self.start_debate().await,
            AnalysisPhase::Synthesis => self.start_synthesis().await,
        }
    }

    /// Move to COMPLETED. Returns false when already terminal.
    pub async fn complete(&mut self, trigger: &str) -> bool {
        self.finish(PhaseState::Completed, trigger).await
    }

    /// Move to FAILED. Returns false when already terminal.
    pub async fn fail(&mut self, reason: &str) -> bool {
        self.finish(PhaseState::Failed, reason).await
    }

    async fn finish(&mut self, to: PhaseState, trigger: &str) -> bool {
        if self.state.is_terminal() {
            debug!(
                session = %self.session_id,
                state = %self.state,
                requested = %to,
                "Session already terminal, ignoring"
            );
            return false;
        }
        self.apply(to, trigger).await;
        true
    }

    async fn transition(&mut self, to: PhaseState, trigger: &str) -> Result<(), OrchestratorError> {
        if !self.state.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                to,
                trigger: trigger.to_string(),
            });
        }
        self.apply(to, trigger).await;
        Ok(())
    }

    async fn apply(&mut self, to: PhaseState, trigger: &str) {
        let record = TransitionRecord {
            session_id: self.session_id,
            from: self.state,
            to,
            trigger: trigger.to_string(),
            at: Utc::now(),
        };
        self.state = to;

        if let Err(e) = self.sessions.record_transition(&record).await {
            error!(
                session = %self.session_id,
                from = %record.from,
                to = %record.to,
                error = %e,
                "Failed to persist phase transition"
            );
        }

        info!(session = %self.session_id, from = %record.from, to = %record.to, trigger = %trigger, "Phase transition");
        for observer in &self.observers {
            observer.on_transition(&record);
        }
        self.history.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChannelObserver, RunEvent};
    use crate::session::{AnalysisSession, Subject};
    use crate::storage::{MemoryStore, SessionRepository};

    async fn machine() -> (PhaseMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = AnalysisSession::new(Subject::new("d", "D"), RunMode::Full, 0);
        store.create_session(&session).await.unwrap();
        (PhaseMachine::new(session.id, store.clone()), store)
    }

    #[test]
    fn test_transition_table() {
        assert!(PhaseState::Init.can_transition_to(PhaseState::Extraction));
        assert!(!PhaseState::Init.can_transition_to(PhaseState::Analysis));
        assert!(PhaseState::Extraction.can_transition_to(PhaseState::Analysis));
        assert!(PhaseState::Analysis.can_transition_to(PhaseState::Synthesis));
        assert!(!PhaseState::Synthesis.can_transition_to(PhaseState::Debate));
        assert!(PhaseState::Gathering.can_transition_to(PhaseState::Failed));
        assert!(!PhaseState::Completed.can_transition_to(PhaseState::Failed));
    }

    #[test]
    fn test_should_debate() {
        assert!(!should_debate(1, RunMode::Full));
        assert!(should_debate(2, RunMode::Full));
        assert!(!should_debate(5, RunMode::Lite));
    }

    #[tokio::test]
    async fn test_full_lifecycle_is_persisted() {
        let (mut m, store) = machine().await;
        m.start_extraction().await.unwrap();
        m.start_gathering().await.unwrap();
        m.start_analysis().await.unwrap();
        m.start_debate().await.unwrap();
        m.start_synthesis().await.unwrap();
        assert!(m.complete("all_phases_done").await);

        assert_eq!(m.state(), PhaseState::Completed);
        assert_eq!(m.history().len(), 6);

        let transitions = store.list_transitions(m.session_id()).await.unwrap();
        assert_eq!(transitions.len(), 6);
        assert_eq!(transitions[0].from, PhaseState::Init);
        assert_eq!(transitions[5].to, PhaseState::Completed);

        let session = store.get_session(m.session_id()).await.unwrap().unwrap();
        assert_eq!(session.phase_state, PhaseState::Completed);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected() {
        let (mut m, _) = machine().await;
        let err = m.start_synthesis().await.unwrap_err();
        assert!(err.is_fatal());
        match err {
            OrchestratorError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, PhaseState::Init);
                assert_eq!(to, PhaseState::Synthesis);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(m.state(), PhaseState::Init);
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_idempotent() {
        let (mut m, store) = machine().await;
        m.start_extraction().await.unwrap();
        assert!(m.fail("agent crashed").await);
        assert!(!m.fail("again").await);
        assert!(!m.complete("late").await);
        assert_eq!(m.state(), PhaseState::Failed);
        assert_eq!(store.list_transitions(m.session_id()).await.unwrap().len(), 2);
        assert!(m.start_analysis().await.is_err());
    }

    #[tokio::test]
    async fn test_observers_receive_transitions() {
        let (m, _) = machine().await;
        let (observer, mut rx) = ChannelObserver::new();
        let mut m = m.with_observers(vec![Arc::new(observer)]);

        m.enter(AnalysisPhase::Extraction).await.unwrap();
        m.enter(AnalysisPhase::Analysis).await.unwrap();

        match rx.recv().await.unwrap() {
            RunEvent::Transition { from, to, .. } => {
                assert_eq!(from, PhaseState::Init);
                assert_eq!(to, PhaseState::Extraction);
            }
            other => panic!("Expected Transition, got {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), RunEvent::Transition { .. }));
    }

    #[tokio::test]
    async fn test_restore_resumes_mid_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let mut m = PhaseMachine::restore(Uuid::new_v4(), PhaseState::Analysis, store);
        assert!(m.history().is_empty());
        m.start_synthesis().await.unwrap();
        assert_eq!(m.state(), PhaseState::Synthesis);
    }
}
