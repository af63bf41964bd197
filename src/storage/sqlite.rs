//! SQLite backend.
//!
//! Rows keep a few indexed columns for lookups and the full record as JSON
//! in `body`. All access goes through [`DbHandle`], which runs the
//! synchronous rusqlite calls on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{CachedRun, CheckpointRepository, FactRepository, RunCache, SessionRepository};
use crate::checkpoint::Checkpoint;
use crate::errors::StorageError;
use crate::facts::FactEvent;
use crate::lifecycle::TransitionRecord;
use crate::session::{AnalysisSession, RunMode};

/// Async-safe handle to the engine database.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl DbHandle {
    fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        }
    }

    /// Run a closure with the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::TaskPanicked(e.to_string()))?
    }
}

pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: DbHandle::new(conn),
        })
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fact_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            subject_id TEXT NOT NULL,
            fact_key TEXT NOT NULL,
            event_type TEXT NOT NULL,
            body TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            phase_state TEXT NOT NULL,
            started_at TEXT NOT NULL,
            body TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transitions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            from_state TEXT NOT NULL,
            to_state TEXT NOT NULL,
            trigger TEXT NOT NULL,
            at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS checkpoints (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL,
            body TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_cache (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            mode TEXT NOT NULL,
            body TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fact_events_subject ON fact_events(subject_id, seq);
        CREATE INDEX IF NOT EXISTS idx_transitions_session ON transitions(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_checkpoints_session ON checkpoints(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_run_cache_key ON run_cache(fingerprint, mode, seq);
        ",
    )?;
    Ok(())
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StorageError> {
    Ok(serde_json::from_str(body)?)
}

fn parse_column<T: std::str::FromStr>(column: &str, raw: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StorageError::InvalidColumn {
        column: column.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl FactRepository for SqliteStore {
    async fn append_events(&self, events: &[FactEvent]) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }
        let rows = events
            .iter()
            .map(|e| {
                Ok((
                    e.id.to_string(),
                    e.subject_id.clone(),
                    e.fact_key.clone(),
                    e.event_type.as_str().to_string(),
                    serde_json::to_string(e)?,
                ))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO fact_events (id, subject_id, fact_key, event_type, body)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for (id, subject, key, kind, body) in &rows {
                        stmt.execute(params![id, subject, key, kind, body])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn load_events(&self, subject_id: &str) -> Result<Vec<FactEvent>, StorageError> {
        let subject_id = subject_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM fact_events WHERE subject_id = ?1 ORDER BY seq",
                )?;
                let bodies = stmt
                    .query_map(params![subject_id], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                bodies.iter().map(|b| decode(b)).collect()
            })
            .await
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn create_session(&self, session: &AnalysisSession) -> Result<(), StorageError> {
        let body = serde_json::to_string(session)?;
        let id = session.id.to_string();
        let subject = session.subject_id.clone();
        let state = session.phase_state.as_str().to_string();
        let started = session.started_at.to_rfc3339();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, subject_id, phase_state, started_at, body)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, subject, state, started, body],
                )?;
                Ok(())
            })
            .await
    }

    async fn update_session(&self, session: &AnalysisSession) -> Result<(), StorageError> {
        let body = serde_json::to_string(session)?;
        let session_id = session.id;
        let state = session.phase_state.as_str().to_string();
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE sessions SET phase_state = ?2, body = ?3 WHERE id = ?1",
                    params![session_id.to_string(), state, body],
                )?;
                if updated == 0 {
                    return Err(StorageError::SessionNotFound(session_id));
                }
                Ok(())
            })
            .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<AnalysisSession>, StorageError> {
        self.db
            .call(move |conn| {
                let row: Option<(String, String)> = conn
                    .query_row(
                        "SELECT body, phase_state FROM sessions WHERE id = ?1",
                        params![id.to_string()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                row.map(|(body, state)| session_from_row(&body, &state))
                    .transpose()
            })
            .await
    }

    async fn list_sessions(&self) -> Result<Vec<AnalysisSession>, StorageError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT body, phase_state FROM sessions ORDER BY started_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.iter()
                    .map(|(body, state)| session_from_row(body, state))
                    .collect()
            })
            .await
    }

    async fn record_transition(&self, record: &TransitionRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO transitions (session_id, from_state, to_state, trigger, at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.session_id.to_string(),
                        record.from.as_str(),
                        record.to.as_str(),
                        record.trigger,
                        record.at.to_rfc3339(),
                    ],
                )?;
                tx.execute(
                    "UPDATE sessions SET phase_state = ?2 WHERE id = ?1",
                    params![record.session_id.to_string(), record.to.as_str()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn list_transitions(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT from_state, to_state, trigger, at FROM transitions
                     WHERE session_id = ?1 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map(params![session_id.to_string()], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(from, to, trigger, at)| {
                        Ok(TransitionRecord {
                            session_id,
                            from: parse_column("from_state", &from)?,
                            to: parse_column("to_state", &to)?,
                            trigger,
                            at: parse_column("at", &at)?,
                        })
                    })
                    .collect()
            })
            .await
    }
}

/// The `phase_state` column is authoritative; transitions update it without
/// rewriting the body.
fn session_from_row(body: &str, state: &str) -> Result<AnalysisSession, StorageError> {
    let mut session: AnalysisSession = decode(body)?;
    session.phase_state = parse_column("phase_state", state)?;
    Ok(session)
}

#[async_trait]
impl CheckpointRepository for SqliteStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let body = serde_json::to_string(checkpoint)?;
        let id = checkpoint.id.to_string();
        let session = checkpoint.session_id.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints (id, session_id, body) VALUES (?1, ?2, ?3)",
                    params![id, session, body],
                )?;
                Ok(())
            })
            .await
    }

    async fn latest_checkpoint(
        &self,
        session_id: Uuid,
    ) -> Result<Option<Checkpoint>, StorageError> {
        self.db
            .call(move |conn| {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM checkpoints WHERE session_id = ?1
                         ORDER BY seq DESC LIMIT 1",
                        params![session_id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                body.map(|b| decode(&b)).transpose()
            })
            .await
    }

    async fn list_checkpoints(&self, session_id: Uuid) -> Result<Vec<Checkpoint>, StorageError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM checkpoints WHERE session_id = ?1 ORDER BY seq DESC",
                )?;
                let bodies = stmt
                    .query_map(params![session_id.to_string()], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                bodies.iter().map(|b| decode(b)).collect()
            })
            .await
    }

    async fn prune_checkpoints(
        &self,
        session_id: Uuid,
        keep: usize,
    ) -> Result<usize, StorageError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.db
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM checkpoints WHERE session_id = ?1 AND seq NOT IN (
                        SELECT seq FROM checkpoints WHERE session_id = ?1
                        ORDER BY seq DESC LIMIT ?2
                     )",
                    params![session_id.to_string(), keep],
                )?;
                Ok(removed)
            })
            .await
    }
}

#[async_trait]
impl RunCache for SqliteStore {
    async fn lookup(
        &self,
        fingerprint: &str,
        mode: RunMode,
        max_age: Duration,
    ) -> Result<Option<CachedRun>, StorageError> {
        let fingerprint = fingerprint.to_string();
        let run: Option<CachedRun> = self
            .db
            .call(move |conn| {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM run_cache WHERE fingerprint = ?1 AND mode = ?2
                         ORDER BY seq DESC LIMIT 1",
                        params![fingerprint, mode.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                body.map(|b| decode(&b)).transpose()
            })
            .await?;
        let now = Utc::now();
        Ok(run.filter(|r| r.is_fresh(max_age, now)))
    }

    async fn store(&self, run: &CachedRun) -> Result<(), StorageError> {
        let body = serde_json::to_string(run)?;
        let fingerprint = run.fingerprint.clone();
        let mode = run.mode.as_str();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO run_cache (fingerprint, mode, body) VALUES (?1, ?2, ?3)",
                    params![fingerprint, mode, body],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{EventType, FactSource, NewFact};
    use crate::lifecycle::PhaseState;
    use crate::session::{RunSummary, Subject, TerminationReason};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store() -> SqliteStore {
        SqliteStore::new_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_events_round_trip_in_append_order() {
        let store = store();
        let a = NewFact::new("team.size", json!(10), FactSource::Inferred);
        let b = NewFact::new("team.size", json!(11), FactSource::Computed);
        let first = FactEvent::from_new("d", &a, EventType::Created, None, "x");
        let second = FactEvent::from_new("d", &b, EventType::Superseded, Some(first.id), "y");
        store
            .append_events(&[first.clone(), second.clone()])
            .await
            .unwrap();

        let loaded = store.load_events("d").await.unwrap();
        assert_eq!(loaded, vec![first, second]);
        assert!(store.load_events("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rolls_back_whole_batch() {
        let store = store();
        let fact = NewFact::new("k.v", json!(1), FactSource::Inferred);
        let event = FactEvent::from_new("d", &fact, EventType::Created, None, "x");
        store.append_events(std::slice::from_ref(&event)).await.unwrap();

        let fresh = FactEvent::from_new("d", &fact, EventType::Created, None, "x");
        assert!(store.append_events(&[fresh, event]).await.is_err());
        assert_eq!(store.load_events("d").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_moves_session_state() {
        let store = store();
        let session = AnalysisSession::new(Subject::new("d", "D"), RunMode::Lite, 3);
        store.create_session(&session).await.unwrap();
        store
            .record_transition(&TransitionRecord {
                session_id: session.id,
                from: PhaseState::Init,
                to: PhaseState::Extraction,
                trigger: "start_extraction".into(),
                at: Utc::now(),
            })
            .await
            .unwrap();

        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.phase_state, PhaseState::Extraction);
        assert_eq!(loaded.mode, RunMode::Lite);
        let transitions = store.list_transitions(session.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].trigger, "start_extraction");
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
        assert!(store.get_session(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_prune_and_latest() {
        let store = store();
        let id = Uuid::new_v4();
        for i in 0..4 {
            let cp = Checkpoint::new(
                id,
                PhaseState::Analysis,
                i,
                &BTreeMap::new(),
                vec![],
                0.0,
                Utc::now(),
            );
            store.save_checkpoint(&cp).await.unwrap();
        }
        assert_eq!(store.prune_checkpoints(id, 2).await.unwrap(), 2);
        let list = store.list_checkpoints(id).await.unwrap();
        assert_eq!(list.iter().map(|c| c.batch_index).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(store.latest_checkpoint(id).await.unwrap().unwrap().batch_index, 3);
    }

    #[tokio::test]
    async fn test_run_cache_respects_mode_and_age() {
        let store = store();
        let run = CachedRun {
            fingerprint: "abc".into(),
            mode: RunMode::Full,
            session_id: Uuid::new_v4(),
            summary: RunSummary {
                success: true,
                termination: TerminationReason::Completed,
                succeeded: vec!["a".into()],
                failed: vec![],
                critical_warnings: 0,
                high_warnings: 0,
                contradictions: 0,
                total_cost: 1.0,
                duration_ms: 10,
            },
            results: BTreeMap::new(),
            stored_at: Utc::now(),
        };
        store.store(&run).await.unwrap();

        let hour = Duration::from_secs(3600);
        assert!(store.lookup("abc", RunMode::Full, hour).await.unwrap().is_some());
        assert!(store.lookup("abc", RunMode::Lite, hour).await.unwrap().is_none());
        assert!(store
            .lookup("abc", RunMode::Full, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }
}
