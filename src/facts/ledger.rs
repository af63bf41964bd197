//! Deterministic replay of the event ledger into the current view.
//!
//! Replay is a pure function of the event list: the same events in the same
//! order always produce the same [`CurrentFact`]s. Events must be supplied in
//! append order.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use super::matcher::relative_delta;
use super::types::{CurrentFact, DisputeDetail, DisputeReason, EventType, FactEvent};

/// A dispute raised across two different keys, applied after the main pass
/// so later resolutions on either key can cancel it.
struct CrossKeyDispute<'a> {
    position: usize,
    raised: &'a FactEvent,
    target: &'a FactEvent,
}

/// Replay `events` into one [`CurrentFact`] per `(subject_id, fact_key)`,
/// ordered by subject then key.
pub fn replay(events: &[FactEvent]) -> Vec<CurrentFact> {
    let deleted: HashSet<Uuid> = events
        .iter()
        .filter(|e| e.event_type == EventType::Deleted)
        .filter_map(|e| e.supersedes_event_id)
        .collect();

    let live: Vec<&FactEvent> = events
        .iter()
        .filter(|e| e.event_type != EventType::Deleted && !deleted.contains(&e.id))
        .collect();

    let by_id: HashMap<Uuid, &FactEvent> = live.iter().map(|e| (e.id, *e)).collect();

    let mut view: BTreeMap<(String, String), CurrentFact> = BTreeMap::new();
    // Last position at which each key was resolved.
    let mut resolved_at: HashMap<(String, String), usize> = HashMap::new();
    let mut cross: Vec<CrossKeyDispute<'_>> = Vec::new();

    for (position, event) in live.iter().copied().enumerate() {
        let key = (event.subject_id.clone(), event.fact_key.clone());
        match event.event_type {
            EventType::Created | EventType::Superseded => {
                apply(&mut view, key, event);
            }
            EventType::Resolved => {
                resolved_at.insert(key.clone(), position);
                let fact = apply(&mut view, key, event);
                fact.is_disputed = false;
                fact.dispute_details.clear();
            }
            EventType::Disputed => {
                let target = event
                    .supersedes_event_id
                    .and_then(|id| by_id.get(&id).copied());
                match (view.get_mut(&key), target) {
                    (Some(fact), Some(target)) if target.fact_key == event.fact_key => {
                        let reason = same_key_reason(&fact.current_value, &event.value);
                        fact.dispute_details.push(detail(event, reason));
                        fact.is_disputed = true;
                        fact.event_history.push(event.id);
                    }
                    (Some(fact), _) => {
                        fact.event_history.push(event.id);
                    }
                    (None, _) => {
                        view.insert(key, CurrentFact::from_event(event));
                    }
                }
                if let Some(target) = target
                    && target.fact_key != event.fact_key
                {
                    cross.push(CrossKeyDispute {
                        position,
                        raised: event,
                        target,
                    });
                }
            }
            EventType::Deleted => {}
        }
    }

    for dispute in cross {
        let raised_key = (
            dispute.raised.subject_id.clone(),
            dispute.raised.fact_key.clone(),
        );
        let target_key = (
            dispute.target.subject_id.clone(),
            dispute.target.fact_key.clone(),
        );
        let settled = [&raised_key, &target_key]
            .iter()
            .any(|k| resolved_at.get(*k).is_some_and(|p| *p > dispute.position));
        if settled {
            continue;
        }

        if let Some(fact) = view.get_mut(&target_key) {
            fact.dispute_details.push(detail(
                dispute.raised,
                DisputeReason::RelatedKey {
                    related_key: dispute.raised.fact_key.clone(),
                },
            ));
            fact.is_disputed = true;
        }
        if let Some(fact) = view.get_mut(&raised_key) {
            fact.dispute_details.push(detail(
                dispute.target,
                DisputeReason::RelatedKey {
                    related_key: dispute.target.fact_key.clone(),
                },
            ));
            fact.is_disputed = true;
        }
    }

    view.into_values().collect()
}

fn apply<'v>(
    view: &'v mut BTreeMap<(String, String), CurrentFact>,
    key: (String, String),
    event: &FactEvent,
) -> &'v mut CurrentFact {
    view.entry(key)
        .and_modify(|fact| {
            fact.apply_value(event);
            fact.event_history.push(event.id);
        })
        .or_insert_with(|| CurrentFact::from_event(event))
}

fn same_key_reason(current: &serde_json::Value, claimed: &serde_json::Value) -> DisputeReason {
    match (current.as_f64(), claimed.as_f64()) {
        (Some(old), Some(new)) => DisputeReason::NumericDelta {
            delta: relative_delta(old, new),
        },
        _ => DisputeReason::ValueMismatch,
    }
}

fn detail(event: &FactEvent, reason: DisputeReason) -> DisputeDetail {
    DisputeDetail {
        event_id: event.id,
        fact_key: event.fact_key.clone(),
        value: event.value.clone(),
        source: event.source,
        confidence: event.source_confidence,
        reason,
        raised_at: event.created_at,
    }
}
