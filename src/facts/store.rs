//! Fact store facade over a [`FactRepository`].
//!
//! Writers are serialised through a single async lock so that matching and
//! appending one submission happen against a stable view. Readers never take
//! the lock; they replay whatever snapshot the repository returns, which is
//! always a whole number of appended batches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::replay;
use super::matcher::{DeltaClass, MatchOutcome, MatchPolicy, match_fact};
use super::types::{
    CurrentFact, DisputeReason, EventType, FactEvent, FactSource, NewFact,
};
use crate::errors::FactStoreError;
use crate::storage::FactRepository;

/// A claim that could not be auto-resolved against the existing view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub subject_id: String,
    /// Key of the incoming claim.
    pub fact_key: String,
    /// Key of the fact it contradicts (equal to `fact_key` for exact matches).
    pub related_key: String,
    pub existing_value: Value,
    pub new_value: Value,
    pub existing_source: FactSource,
    pub new_source: FactSource,
    pub existing_confidence: u8,
    pub new_confidence: u8,
    pub class: DeltaClass,
    pub reason: DisputeReason,
    /// The DISPUTED event recording the claim.
    pub event_id: Uuid,
    pub submitted_by: String,
}

/// Outcome of submitting one claim.
#[derive(Debug, Clone)]
pub struct Submission {
    pub fact_key: String,
    pub outcome: MatchOutcome,
    /// The event appended, if any. `None` for ignored claims.
    pub event: Option<FactEvent>,
    pub contradiction: Option<Contradiction>,
}

pub struct FactStore {
    repo: Arc<dyn FactRepository>,
    policy: MatchPolicy,
    write_lock: Mutex<()>,
}

impl FactStore {
    pub fn new(repo: Arc<dyn FactRepository>, policy: MatchPolicy) -> Self {
        Self {
            repo,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Consolidated view for a subject, one entry per key.
    pub async fn current(&self, subject_id: &str) -> Result<Vec<CurrentFact>, FactStoreError> {
        let events = self.repo.load_events(subject_id).await?;
        Ok(replay(&events))
    }

    pub async fn current_fact(
        &self,
        subject_id: &str,
        fact_key: &str,
    ) -> Result<Option<CurrentFact>, FactStoreError> {
        Ok(self
            .current(subject_id)
            .await?
            .into_iter()
            .find(|f| f.fact_key == fact_key))
    }

    /// Every event ever appended for a key, deletions included.
    pub async fn history(
        &self,
        subject_id: &str,
        fact_key: &str,
    ) -> Result<Vec<FactEvent>, FactStoreError> {
        let events = self.repo.load_events(subject_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.fact_key == fact_key)
            .collect())
    }

    /// Raw append. Callers are responsible for event semantics.
    pub async fn append(&self, events: &[FactEvent]) -> Result<(), FactStoreError> {
        let _guard = self.write_lock.lock().await;
        self.repo.append_events(events).await?;
        Ok(())
    }

    pub async fn submit(
        &self,
        subject_id: &str,
        fact: NewFact,
        actor: &str,
    ) -> Result<Submission, FactStoreError> {
        let mut submissions = self.submit_batch(subject_id, vec![fact], actor).await?;
        Ok(submissions.remove(0))
    }

    /// Match and append a batch of claims atomically.
    ///
    /// Claims are matched in order, each against the view that includes the
    /// claims before it, so one agent reporting two values for a key
    /// resolves the same way as two sequential submissions.
    pub async fn submit_batch(
        &self,
        subject_id: &str,
        facts: Vec<NewFact>,
        actor: &str,
    ) -> Result<Vec<Submission>, FactStoreError> {
        let facts: Vec<NewFact> = facts.into_iter().map(NewFact::normalized).collect();
        for fact in &facts {
            fact.validate()?;
        }

        let _guard = self.write_lock.lock().await;
        let mut ledger = self.repo.load_events(subject_id).await?;
        let mut view = replay(&ledger);
        let mut pending = Vec::new();
        let mut submissions = Vec::with_capacity(facts.len());

        for fact in facts {
            let submission = self.submit_one(subject_id, fact, actor, &ledger, &view);
            if let Some(event) = &submission.event {
                ledger.push(event.clone());
                pending.push(event.clone());
                view = replay(&ledger);
            }
            submissions.push(submission);
        }

        if !pending.is_empty() {
            self.repo.append_events(&pending).await?;
            debug!(
                subject = %subject_id,
                actor = %actor,
                events = pending.len(),
                "Appended fact events"
            );
        }

        Ok(submissions)
    }

    fn submit_one(
        &self,
        subject_id: &str,
        fact: NewFact,
        actor: &str,
        ledger: &[FactEvent],
        view: &[CurrentFact],
    ) -> Submission {
        // Resubmitting a claim already in the ledger is a no-op.
        if is_already_recorded(ledger, &fact)
            && let Some(existing) = view.iter().find(|f| f.fact_key == fact.fact_key)
        {
            return Submission {
                fact_key: fact.fact_key,
                outcome: MatchOutcome::Ignore {
                    existing: existing.clone(),
                    duplicate: true,
                },
                event: None,
                contradiction: None,
            };
        }

        let outcome = match_fact(&fact, view, &self.policy);
        let (event, contradiction) = match &outcome {
            MatchOutcome::New => (
                Some(FactEvent::from_new(
                    subject_id,
                    &fact,
                    EventType::Created,
                    None,
                    actor,
                )),
                None,
            ),
            MatchOutcome::Supersede { existing, .. } => (
                Some(FactEvent::from_new(
                    subject_id,
                    &fact,
                    EventType::Superseded,
                    Some(existing.current_event_id),
                    actor,
                )),
                None,
            ),
            MatchOutcome::Ignore { .. } => (None, None),
            MatchOutcome::ReviewNeeded {
                existing,
                reason,
                class,
            } => {
                let event = FactEvent::from_new(
                    subject_id,
                    &fact,
                    EventType::Disputed,
                    Some(existing.current_event_id),
                    actor,
                );
                warn!(
                    subject = %subject_id,
                    key = %fact.fact_key,
                    related = %existing.fact_key,
                    class = ?class,
                    "Fact contradiction needs review"
                );
                let contradiction = Contradiction {
                    subject_id: subject_id.to_string(),
                    fact_key: fact.fact_key.clone(),
                    related_key: existing.fact_key.clone(),
                    existing_value: existing.current_value.clone(),
                    new_value: fact.value.clone(),
                    existing_source: existing.current_source,
                    new_source: fact.source,
                    existing_confidence: existing.current_confidence,
                    new_confidence: fact.source_confidence,
                    class: *class,
                    reason: reason.clone(),
                    event_id: event.id,
                    submitted_by: actor.to_string(),
                };
                (Some(event), Some(contradiction))
            }
        };

        Submission {
            fact_key: fact.fact_key,
            outcome,
            event,
            contradiction,
        }
    }

    /// Settle a dispute by recording the accepted value as RESOLVED.
    pub async fn resolve(
        &self,
        subject_id: &str,
        fact_key: &str,
        value: Value,
        source: FactSource,
        actor: &str,
    ) -> Result<FactEvent, FactStoreError> {
        let _guard = self.write_lock.lock().await;
        let ledger = self.repo.load_events(subject_id).await?;
        let view = replay(&ledger);
        let current = view
            .iter()
            .find(|f| f.fact_key == fact_key)
            .ok_or_else(|| FactStoreError::NoCurrentFact {
                subject_id: subject_id.to_string(),
                key: fact_key.to_string(),
            })?;

        let mut fact = NewFact::new(fact_key, value, source);
        fact.category = current.category.clone();
        fact.unit = current.unit.clone();
        let event = FactEvent::from_new(
            subject_id,
            &fact,
            EventType::Resolved,
            Some(current.current_event_id),
            actor,
        );
        self.repo
            .append_events(std::slice::from_ref(&event))
            .await?;
        info!(
            subject = %subject_id,
            key = %fact_key,
            actor = %actor,
            was_disputed = current.is_disputed,
            "Resolved fact"
        );
        Ok(event)
    }

    /// Retract an event by appending a DELETED marker.
    pub async fn delete(
        &self,
        subject_id: &str,
        event_id: Uuid,
        actor: &str,
    ) -> Result<FactEvent, FactStoreError> {
        let _guard = self.write_lock.lock().await;
        let ledger = self.repo.load_events(subject_id).await?;
        let target = ledger
            .iter()
            .find(|e| e.id == event_id && e.event_type != EventType::Deleted)
            .ok_or(FactStoreError::EventNotFound(event_id))?;
        if ledger.iter().any(|e| {
            e.event_type == EventType::Deleted && e.supersedes_event_id == Some(event_id)
        }) {
            return Err(FactStoreError::AlreadyDeleted(event_id));
        }

        let marker = FactEvent::deletion_of(target, actor);
        self.repo
            .append_events(std::slice::from_ref(&marker))
            .await?;
        info!(subject = %subject_id, event = %event_id, actor = %actor, "Deleted fact event");
        Ok(marker)
    }
}

fn is_already_recorded(ledger: &[FactEvent], fact: &NewFact) -> bool {
    let deleted: Vec<Uuid> = ledger
        .iter()
        .filter(|e| e.event_type == EventType::Deleted)
        .filter_map(|e| e.supersedes_event_id)
        .collect();
    ledger.iter().any(|e| {
        e.event_type != EventType::Deleted && !deleted.contains(&e.id) && e.same_claim(fact)
    })
}
