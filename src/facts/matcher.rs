//! Matching a new claim against the consolidated view.
//!
//! Matching proceeds in three steps:
//! 1. exact `fact_key` match, resolved by magnitude of disagreement and
//!    source priority
//! 2. a parent/child or sibling-prefix match on hierarchical keys, which is
//!    always routed to review
//! 3. otherwise the claim is new

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{CurrentFact, DisputeReason, NewFact};

/// Tolerances used when comparing numeric claims.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Relative delta above which a numeric disagreement needs review.
    pub dispute_threshold: f64,
    /// Relative delta at or below which a disagreement is minor.
    pub minor_threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            dispute_threshold: 0.30,
            minor_threshold: 0.10,
        }
    }
}

/// How large a disagreement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaClass {
    Minor,
    Significant,
    Major,
}

impl DeltaClass {
    pub fn classify(delta: f64, policy: &MatchPolicy) -> Self {
        if delta <= policy.minor_threshold {
            Self::Minor
        } else if delta <= policy.dispute_threshold {
            Self::Significant
        } else {
            Self::Major
        }
    }
}

/// Result of matching one claim.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// No related fact exists.
    New,
    /// The claim replaces `existing` as current.
    Supersede {
        existing: CurrentFact,
        delta: Option<f64>,
    },
    /// The claim is dropped. `duplicate` is set when an identical claim is
    /// already current.
    Ignore {
        existing: CurrentFact,
        duplicate: bool,
    },
    /// The claim conflicts with `existing` and needs an external decision.
    ReviewNeeded {
        existing: CurrentFact,
        reason: DisputeReason,
        class: DeltaClass,
    },
}

impl MatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Supersede { .. } => "supersede",
            Self::Ignore { .. } => "ignore",
            Self::ReviewNeeded { .. } => "review_needed",
        }
    }

    pub fn needs_review(&self) -> bool {
        matches!(self, Self::ReviewNeeded { .. })
    }
}

/// Match `new` against the current view of its subject.
pub fn match_fact(new: &NewFact, existing: &[CurrentFact], policy: &MatchPolicy) -> MatchOutcome {
    if let Some(current) = existing.iter().find(|f| f.fact_key == new.fact_key) {
        return resolve_exact(new, current, policy);
    }

    if let Some(related) = existing
        .iter()
        .find(|f| keys_related(&f.fact_key, &new.fact_key))
    {
        let class = match (truthiness(&related.current_value), truthiness(&new.value)) {
            (Some(a), Some(b)) if a != b => DeltaClass::Major,
            _ => DeltaClass::Significant,
        };
        return MatchOutcome::ReviewNeeded {
            existing: related.clone(),
            reason: DisputeReason::RelatedKey {
                related_key: related.fact_key.clone(),
            },
            class,
        };
    }

    MatchOutcome::New
}

fn resolve_exact(new: &NewFact, current: &CurrentFact, policy: &MatchPolicy) -> MatchOutcome {
    if current.current_value == new.value && current.current_source == new.source {
        return MatchOutcome::Ignore {
            existing: current.clone(),
            duplicate: true,
        };
    }

    let delta = match (current.current_value.as_f64(), new.value.as_f64()) {
        (Some(old), Some(candidate)) => Some(relative_delta(old, candidate)),
        _ => None,
    };

    if let Some(d) = delta
        && d > policy.dispute_threshold
    {
        return MatchOutcome::ReviewNeeded {
            existing: current.clone(),
            reason: DisputeReason::NumericDelta { delta: d },
            class: DeltaClass::Major,
        };
    }

    let new_rank = new.source.rank();
    let old_rank = current.current_source.rank();
    if new_rank >= old_rank || new.source.is_override() {
        MatchOutcome::Supersede {
            existing: current.clone(),
            delta,
        }
    } else {
        MatchOutcome::Ignore {
            existing: current.clone(),
            duplicate: false,
        }
    }
}

/// `|new - existing| / |existing|`. A change away from zero is unbounded.
pub fn relative_delta(existing: f64, new: f64) -> f64 {
    if existing == 0.0 {
        if new == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        (new - existing).abs() / existing.abs()
    }
}

/// Parent/child (`a.b` vs `a.b.c`) or sibling-prefix (`a.b` vs `a.b_exist`).
pub fn keys_related(a: &str, b: &str) -> bool {
    if a == b {
        return false;
    }
    if is_ancestor(a, b) || is_ancestor(b, a) {
        return true;
    }
    let (parent_a, leaf_a) = split_leaf(a);
    let (parent_b, leaf_b) = split_leaf(b);
    parent_a == parent_b && (leaf_prefix(leaf_a, leaf_b) || leaf_prefix(leaf_b, leaf_a))
}

fn is_ancestor(ancestor: &str, key: &str) -> bool {
    key.len() > ancestor.len()
        && key.starts_with(ancestor)
        && key.as_bytes()[ancestor.len()] == b'.'
}

fn split_leaf(key: &str) -> (&str, &str) {
    match key.rfind('.') {
        Some(i) => (&key[..i], &key[i + 1..]),
        None => ("", key),
    }
}

fn leaf_prefix(short: &str, long: &str) -> bool {
    long.len() > short.len() && long.starts_with(short) && long.as_bytes()[short.len()] == b'_'
}

/// Whether a value asserts presence. `None` for null.
pub fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => Some(!s.is_empty()),
        Value::Array(items) => Some(!items.is_empty()),
        Value::Object(map) => Some(!map.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::types::{EventType, FactEvent, FactSource};
    use serde_json::json;

    fn current(key: &str, value: Value, source: FactSource) -> CurrentFact {
        let fact = NewFact::new(key, value, source);
        let event = FactEvent::from_new("deal-1", &fact, EventType::Created, None, "test");
        CurrentFact::from_event(&event)
    }

    #[test]
    fn test_no_existing_fact_is_new() {
        let new = NewFact::new("financial.arr", json!(1), FactSource::Inferred);
        let outcome = match_fact(&new, &[], &MatchPolicy::default());
        assert_eq!(outcome, MatchOutcome::New);
    }

    #[test]
    fn test_higher_source_within_tolerance_supersedes() {
        let existing = vec![current(
            "financial.arr",
            json!(500000),
            FactSource::DocumentDerived,
        )];
        let new = NewFact::new("financial.arr", json!(535000), FactSource::VerifiedGroundTruth);

        match match_fact(&new, &existing, &MatchPolicy::default()) {
            MatchOutcome::Supersede { delta, .. } => {
                let d = delta.unwrap();
                assert!((d - 0.07).abs() < 1e-9);
                assert_eq!(
                    DeltaClass::classify(d, &MatchPolicy::default()),
                    DeltaClass::Minor
                );
            }
            other => panic!("Expected Supersede, got {:?}", other),
        }
    }

    #[test]
    fn test_large_delta_needs_review_even_from_higher_source() {
        let existing = vec![current("financial.arr", json!(100), FactSource::Inferred)];
        let new = NewFact::new("financial.arr", json!(200), FactSource::VerifiedGroundTruth);

        match match_fact(&new, &existing, &MatchPolicy::default()) {
            MatchOutcome::ReviewNeeded { reason, class, .. } => {
                assert_eq!(reason, DisputeReason::NumericDelta { delta: 1.0 });
                assert_eq!(class, DeltaClass::Major);
            }
            other => panic!("Expected ReviewNeeded, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_delta_is_not_disputed() {
        let existing = vec![current("financial.arr", json!(100), FactSource::Computed)];
        let new = NewFact::new("financial.arr", json!(130), FactSource::Computed);
        assert!(matches!(
            match_fact(&new, &existing, &MatchPolicy::default()),
            MatchOutcome::Supersede { .. }
        ));
    }

    #[test]
    fn test_equal_rank_most_recent_wins() {
        let existing = vec![current("team.size", json!(10), FactSource::HumanAsserted)];
        let new = NewFact::new("team.size", json!(11), FactSource::HumanAsserted);
        assert!(matches!(
            match_fact(&new, &existing, &MatchPolicy::default()),
            MatchOutcome::Supersede { .. }
        ));
    }

    #[test]
    fn test_lower_rank_is_ignored_unless_override() {
        let existing = vec![current("team.size", json!(10), FactSource::Computed)];

        let lower = NewFact::new("team.size", json!(11), FactSource::HumanAsserted);
        assert!(matches!(
            match_fact(&lower, &existing, &MatchPolicy::default()),
            MatchOutcome::Ignore {
                duplicate: false,
                ..
            }
        ));

        let human = NewFact::new("team.size", json!(11), FactSource::HumanOverride);
        assert!(matches!(
            match_fact(&human, &existing, &MatchPolicy::default()),
            MatchOutcome::Supersede { .. }
        ));
    }

    #[test]
    fn test_identical_claim_is_duplicate() {
        let existing = vec![current("market.tam", json!(1e9), FactSource::Inferred)];
        let new = NewFact::new("market.tam", json!(1e9), FactSource::Inferred);
        assert!(matches!(
            match_fact(&new, &existing, &MatchPolicy::default()),
            MatchOutcome::Ignore {
                duplicate: true,
                ..
            }
        ));
    }

    #[test]
    fn test_non_numeric_values_resolve_by_rank() {
        let existing = vec![current("company.hq", json!("Paris"), FactSource::Inferred)];
        let new = NewFact::new("company.hq", json!("Lyon"), FactSource::DocumentDerived);
        assert!(matches!(
            match_fact(&new, &existing, &MatchPolicy::default()),
            MatchOutcome::Supersede { delta: None, .. }
        ));
    }

    #[test]
    fn test_related_keys_always_need_review() {
        let existing = vec![current(
            "team.competitors_exist",
            json!(false),
            FactSource::HumanAsserted,
        )];
        let new = NewFact::new(
            "team.competitors",
            json!(["A", "B", "C", "D", "E"]),
            FactSource::Inferred,
        );

        match match_fact(&new, &existing, &MatchPolicy::default()) {
            MatchOutcome::ReviewNeeded {
                existing,
                reason,
                class,
            } => {
                assert_eq!(existing.fact_key, "team.competitors_exist");
                assert_eq!(
                    reason,
                    DisputeReason::RelatedKey {
                        related_key: "team.competitors_exist".to_string()
                    }
                );
                assert_eq!(class, DeltaClass::Major);
            }
            other => panic!("Expected ReviewNeeded, got {:?}", other),
        }
    }

    #[test]
    fn test_keys_related() {
        assert!(keys_related("financial.revenue", "financial.revenue.2024"));
        assert!(keys_related("financial.revenue.2024", "financial.revenue"));
        assert!(keys_related("team.competitors", "team.competitors_exist"));
        assert!(!keys_related("financial.arr", "financial.arr"));
        assert!(!keys_related("financial.arr", "financial.arpu"));
        assert!(!keys_related("team.size", "market.size"));
    }

    #[test]
    fn test_relative_delta_from_zero() {
        assert_eq!(relative_delta(0.0, 0.0), 0.0);
        assert!(relative_delta(0.0, 5.0).is_infinite());
        assert!((relative_delta(-100.0, -120.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_delta_classes() {
        let policy = MatchPolicy::default();
        assert_eq!(DeltaClass::classify(0.05, &policy), DeltaClass::Minor);
        assert_eq!(DeltaClass::classify(0.2, &policy), DeltaClass::Significant);
        assert_eq!(DeltaClass::classify(0.31, &policy), DeltaClass::Major);
    }
}
