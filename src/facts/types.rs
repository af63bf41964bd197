//! Fact ledger types.
//!
//! A [`FactEvent`] is an immutable record; once appended its value fields
//! never change. Corrections, disputes, resolutions and deletions are all new
//! events. [`CurrentFact`] is the derived view computed by replaying events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::FactStoreError;

/// Where a fact came from, ranked by how much it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Checked against an authoritative record (registry, bank statement).
    VerifiedGroundTruth,
    /// Derived by a deterministic computation over other facts.
    Computed,
    /// An explicit human correction; always supersedes within tolerance.
    HumanOverride,
    /// Stated by a person (founder, analyst) without verification.
    HumanAsserted,
    /// Extracted from a submitted document.
    DocumentDerived,
    /// Inferred by an agent or pulled from an external lookup.
    Inferred,
}

impl FactSource {
    /// Priority rank, higher wins.
    pub fn rank(&self) -> u8 {
        match self {
            Self::VerifiedGroundTruth => 5,
            Self::Computed => 4,
            Self::HumanOverride | Self::HumanAsserted => 3,
            Self::DocumentDerived => 2,
            Self::Inferred => 1,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Self::HumanOverride)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifiedGroundTruth => "verified_ground_truth",
            Self::Computed => "computed",
            Self::HumanOverride => "human_override",
            Self::HumanAsserted => "human_asserted",
            Self::DocumentDerived => "document_derived",
            Self::Inferred => "inferred",
        }
    }
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verified_ground_truth" | "verified" => Ok(Self::VerifiedGroundTruth),
            "computed" => Ok(Self::Computed),
            "human_override" | "override" => Ok(Self::HumanOverride),
            "human_asserted" | "human" => Ok(Self::HumanAsserted),
            "document_derived" | "document" => Ok(Self::DocumentDerived),
            "inferred" | "external" => Ok(Self::Inferred),
            _ => anyhow::bail!(
                "Invalid fact source '{}'. Valid values: verified_ground_truth, computed, human_override, human_asserted, document_derived, inferred",
                s
            ),
        }
    }
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Superseded,
    Disputed,
    Resolved,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Superseded => "SUPERSEDED",
            Self::Disputed => "DISPUTED",
            Self::Resolved => "RESOLVED",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "SUPERSEDED" => Ok(Self::Superseded),
            "DISPUTED" => Ok(Self::Disputed),
            "RESOLVED" => Ok(Self::Resolved),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// A claim an agent (or a person) wants to record about a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFact {
    /// Canonical dotted name, e.g. `financial.arr`
    pub fact_key: String,
    #[serde(default)]
    pub category: String,
    pub value: Value,
    #[serde(default)]
    pub display_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub source: FactSource,
    #[serde(default = "default_confidence")]
    pub source_confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

fn default_confidence() -> u8 {
    50
}

impl NewFact {
    pub fn new(fact_key: &str, value: Value, source: FactSource) -> Self {
        let category = fact_key.split('.').next().unwrap_or_default().to_string();
        Self {
            fact_key: fact_key.to_string(),
            category,
            value,
            display_value: None,
            unit: None,
            source,
            source_confidence: default_confidence(),
            extracted_text: None,
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.source_confidence = confidence;
        self
    }

    pub fn with_display(mut self, display: &str) -> Self {
        self.display_value = Some(display.to_string());
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_extracted_text(mut self, text: &str) -> Self {
        self.extracted_text = Some(text.to_string());
        self
    }

    /// Fill the category from the key when a deserialized claim omitted it.
    pub fn normalized(mut self) -> Self {
        self.fact_key = self.fact_key.trim().to_string();
        if self.category.is_empty() {
            self.category = self
                .fact_key
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), FactStoreError> {
        if self.fact_key.trim().is_empty() {
            return Err(FactStoreError::EmptyKey);
        }
        if self.source_confidence > 100 {
            return Err(FactStoreError::ConfidenceOutOfRange(self.source_confidence));
        }
        Ok(())
    }

    /// Display text, falling back to the raw JSON rendering.
    pub fn display(&self) -> String {
        self.display_value
            .clone()
            .unwrap_or_else(|| display_json(&self.value))
    }
}

/// Immutable, append-only ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEvent {
    pub id: Uuid,
    pub subject_id: String,
    pub fact_key: String,
    pub category: String,
    pub value: Value,
    pub display_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub source: FactSource,
    pub source_confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub event_type: EventType,
    /// For SUPERSEDED/RESOLVED: the event replaced. For DISPUTED: the event
    /// contradicted (possibly under another key). For DELETED: the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl FactEvent {
    /// Build an event carrying the claim in `fact`.
    pub fn from_new(
        subject_id: &str,
        fact: &NewFact,
        event_type: EventType,
        supersedes_event_id: Option<Uuid>,
        created_by: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            fact_key: fact.fact_key.clone(),
            category: fact.category.clone(),
            value: fact.value.clone(),
            display_value: fact.display(),
            unit: fact.unit.clone(),
            source: fact.source,
            source_confidence: fact.source_confidence,
            extracted_text: fact.extracted_text.clone(),
            event_type,
            supersedes_event_id,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        }
    }

    /// A DELETED marker for `target`. Value fields mirror the target so the
    /// ledger stays self-describing.
    pub fn deletion_of(target: &FactEvent, created_by: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: EventType::Deleted,
            supersedes_event_id: Some(target.id),
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            ..target.clone()
        }
    }

    /// Same claim: key, value and source all match.
    pub fn same_claim(&self, fact: &NewFact) -> bool {
        self.fact_key == fact.fact_key && self.value == fact.value && self.source == fact.source
    }
}

/// Why a key is disputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisputeReason {
    /// Numeric values disagree by more than the tolerance.
    NumericDelta { delta: f64 },
    /// Non-numeric values disagree.
    ValueMismatch,
    /// A claim under a parent/child or sibling key conflicts with this one.
    RelatedKey { related_key: String },
}

/// A competing claim attached to a disputed [`CurrentFact`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeDetail {
    pub event_id: Uuid,
    pub fact_key: String,
    pub value: Value,
    pub source: FactSource,
    pub confidence: u8,
    pub reason: DisputeReason,
    pub raised_at: DateTime<Utc>,
}

/// Derived, recomputable view of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentFact {
    pub subject_id: String,
    pub fact_key: String,
    pub category: String,
    pub current_value: Value,
    pub display_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub current_source: FactSource,
    pub current_confidence: u8,
    pub current_event_id: Uuid,
    pub is_disputed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dispute_details: Vec<DisputeDetail>,
    /// Non-deleted event ids for this key, in ledger order.
    pub event_history: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl CurrentFact {
    pub(crate) fn from_event(event: &FactEvent) -> Self {
        Self {
            subject_id: event.subject_id.clone(),
            fact_key: event.fact_key.clone(),
            category: event.category.clone(),
            current_value: event.value.clone(),
            display_value: event.display_value.clone(),
            unit: event.unit.clone(),
            current_source: event.source,
            current_confidence: event.source_confidence,
            current_event_id: event.id,
            is_disputed: false,
            dispute_details: Vec::new(),
            event_history: vec![event.id],
            updated_at: event.created_at,
        }
    }

    /// Make `event`'s claim the current value, keeping history and disputes.
    pub(crate) fn apply_value(&mut self, event: &FactEvent) {
        self.category = event.category.clone();
        self.current_value = event.value.clone();
        self.display_value = event.display_value.clone();
        self.unit = event.unit.clone();
        self.current_source = event.source;
        self.current_confidence = event.source_confidence;
        self.current_event_id = event.id;
        self.updated_at = event.created_at;
    }
}

/// Render a JSON value for display: strings unquoted, everything else compact.
pub fn display_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
