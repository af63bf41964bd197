//! In-process backend.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{CachedRun, CheckpointRepository, FactRepository, RunCache, SessionRepository};
use crate::checkpoint::Checkpoint;
use crate::errors::StorageError;
use crate::facts::FactEvent;
use crate::lifecycle::TransitionRecord;
use crate::session::{AnalysisSession, RunMode};

#[derive(Default)]
struct Tables {
    events: Vec<FactEvent>,
    sessions: HashMap<Uuid, AnalysisSession>,
    transitions: Vec<TransitionRecord>,
    checkpoints: Vec<Checkpoint>,
    cache: Vec<CachedRun>,
}

/// Everything in one lock. Appends of a batch are therefore atomic with
/// respect to readers.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StorageError> {
        let guard = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&guard))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StorageError> {
        let mut guard = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl FactRepository for MemoryStore {
    /// All or nothing: a batch carrying an id that is already stored, or
    /// repeated within the batch, is rejected without appending anything.
    async fn append_events(&self, events: &[FactEvent]) -> Result<(), StorageError> {
        self.write(|t| {
            let mut seen: HashSet<Uuid> = t.events.iter().map(|e| e.id).collect();
            if let Some(dup) = events.iter().find(|e| !seen.insert(e.id)) {
                return Err(StorageError::DuplicateEvent(dup.id));
            }
            t.events.extend_from_slice(events);
            Ok(())
        })?
    }

    async fn load_events(&self, subject_id: &str) -> Result<Vec<FactEvent>, StorageError> {
        self.read(|t| {
            t.events
                .iter()
                .filter(|e| e.subject_id == subject_id)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, session: &AnalysisSession) -> Result<(), StorageError> {
        self.write(|t| {
            t.sessions.insert(session.id, session.clone());
        })
    }

    async fn update_session(&self, session: &AnalysisSession) -> Result<(), StorageError> {
        self.write(|t| match t.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StorageError::SessionNotFound(session.id)),
        })?
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<AnalysisSession>, StorageError> {
        self.read(|t| t.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<AnalysisSession>, StorageError> {
        self.read(|t| {
            let mut sessions: Vec<_> = t.sessions.values().cloned().collect();
            sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            sessions
        })
    }

    async fn record_transition(&self, record: &TransitionRecord) -> Result<(), StorageError> {
        self.write(|t| {
            t.transitions.push(record.clone());
            if let Some(session) = t.sessions.get_mut(&record.session_id) {
                session.phase_state = record.to;
            }
        })
    }

    async fn list_transitions(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StorageError> {
        self.read(|t| {
            t.transitions
                .iter()
                .filter(|r| r.session_id == session_id)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl CheckpointRepository for MemoryStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.write(|t| t.checkpoints.push(checkpoint.clone()))
    }

    async fn latest_checkpoint(
        &self,
        session_id: Uuid,
    ) -> Result<Option<Checkpoint>, StorageError> {
        self.read(|t| {
            t.checkpoints
                .iter()
                .rev()
                .find(|c| c.session_id == session_id)
                .cloned()
        })
    }

    async fn list_checkpoints(&self, session_id: Uuid) -> Result<Vec<Checkpoint>, StorageError> {
        self.read(|t| {
            t.checkpoints
                .iter()
                .rev()
                .filter(|c| c.session_id == session_id)
                .cloned()
                .collect()
        })
    }

    async fn prune_checkpoints(
        &self,
        session_id: Uuid,
        keep: usize,
    ) -> Result<usize, StorageError> {
        self.write(|t| {
            let total = t
                .checkpoints
                .iter()
                .filter(|c| c.session_id == session_id)
                .count();
            let excess = total.saturating_sub(keep);
            let mut skipped = 0;
            t.checkpoints.retain(|c| {
                if c.session_id != session_id || skipped >= excess {
                    return true;
                }
                skipped += 1;
                false
            });
            excess
        })
    }
}

#[async_trait]
impl RunCache for MemoryStore {
    async fn lookup(
        &self,
        fingerprint: &str,
        mode: RunMode,
        max_age: Duration,
    ) -> Result<Option<CachedRun>, StorageError> {
        let now = Utc::now();
        self.read(|t| {
            t.cache
                .iter()
                .rev()
                .find(|r| r.fingerprint == fingerprint && r.mode == mode)
                .filter(|r| r.is_fresh(max_age, now))
                .cloned()
        })
    }

    async fn store(&self, run: &CachedRun) -> Result<(), StorageError> {
        self.write(|t| t.cache.push(run.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{EventType, FactSource, NewFact};
    use crate::lifecycle::PhaseState;
    use crate::session::Subject;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn checkpoint(session_id: Uuid, batch_index: usize) -> Checkpoint {
        Checkpoint::new(
            session_id,
            PhaseState::Analysis,
            batch_index,
            &BTreeMap::new(),
            Vec::new(),
            0.0,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_events_are_scoped_by_subject() {
        let store = MemoryStore::new();
        let fact = NewFact::new("a.b", json!(1), FactSource::Inferred);
        store
            .append_events(&[
                FactEvent::from_new("s1", &fact, EventType::Created, None, "x"),
                FactEvent::from_new("s2", &fact, EventType::Created, None, "x"),
            ])
            .await
            .unwrap();
        assert_eq!(store.load_events("s1").await.unwrap().len(), 1);
        assert!(store.load_events("s3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rejects_whole_batch() {
        let store = MemoryStore::new();
        let fact = NewFact::new("k.v", json!(1), FactSource::Inferred);
        let event = FactEvent::from_new("d", &fact, EventType::Created, None, "x");
        store.append_events(std::slice::from_ref(&event)).await.unwrap();

        let fresh = FactEvent::from_new("d", &fact, EventType::Created, None, "x");
        assert!(matches!(
            store.append_events(&[fresh.clone(), event]).await,
            Err(StorageError::DuplicateEvent(_))
        ));
        assert_eq!(store.load_events("d").await.unwrap().len(), 1);

        // Repeats inside one batch are refused too.
        assert!(store.append_events(&[fresh.clone(), fresh]).await.is_err());
        assert_eq!(store.load_events("d").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_session_errors() {
        let store = MemoryStore::new();
        let session = AnalysisSession::new(Subject::new("d", "D"), RunMode::Full, 1);
        assert!(matches!(
            store.update_session(&session).await,
            Err(StorageError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        for i in 0..5 {
            store.save_checkpoint(&checkpoint(id, i)).await.unwrap();
        }
        store.save_checkpoint(&checkpoint(other, 0)).await.unwrap();

        assert_eq!(store.prune_checkpoints(id, 2).await.unwrap(), 3);
        let remaining = store.list_checkpoints(id).await.unwrap();
        assert_eq!(
            remaining.iter().map(|c| c.batch_index).collect::<Vec<_>>(),
            vec![4, 3]
        );
        assert_eq!(store.list_checkpoints(other).await.unwrap().len(), 1);
        assert_eq!(
            store.latest_checkpoint(id).await.unwrap().unwrap().batch_index,
            4
        );
    }
}
