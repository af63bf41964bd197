//! Event-sourced fact store.
//!
//! Facts are atomic, sourced claims about a subject. Every change is an
//! appended [`FactEvent`]; the [`CurrentFact`] view is recomputed by replay.

pub mod ledger;
pub mod matcher;
pub mod store;
pub mod types;

pub use ledger::replay;
pub use matcher::{DeltaClass, MatchOutcome, MatchPolicy, match_fact};
pub use store::{Contradiction, FactStore, Submission};
pub use types::{
    CurrentFact, DisputeDetail, DisputeReason, EventType, FactEvent, FactSource, NewFact,
};
