//! Run-level circuit breaker: cost budget and fail-fast on critical warnings.
//!
//! Checked between batches only. A batch already in flight always runs to
//! completion, so the budget can be overshot by at most one batch.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::evaluator::WarningSummary;
use crate::session::TerminationReason;

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitDecision {
    Continue,
    Halt(TerminationReason),
}

impl CircuitDecision {
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_budget: Option<f64>,
    #[serde(default)]
    pub fail_fast_on_critical: bool,
}

impl CircuitBreaker {
    pub fn new(max_cost_budget: Option<f64>, fail_fast_on_critical: bool) -> Self {
        Self {
            max_cost_budget,
            fail_fast_on_critical,
        }
    }

    /// Checked before each batch starts.
    pub fn check_cost(&self, spent: f64) -> CircuitDecision {
        match self.max_cost_budget {
            Some(budget) if spent >= budget => {
                warn!(spent, budget, "Cost budget reached, halting run");
                CircuitDecision::Halt(TerminationReason::CostLimitReached { spent, budget })
            }
            _ => CircuitDecision::Continue,
        }
    }

    /// Checked after each batch's warnings are evaluated.
    pub fn check_warnings(&self, summary: &WarningSummary) -> CircuitDecision {
        if self.fail_fast_on_critical && summary.has_critical {
            warn!(count = summary.critical, "Critical warning raised, halting run");
            CircuitDecision::Halt(TerminationReason::CriticalWarning {
                count: summary.critical,
            })
        } else {
            CircuitDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_budget_never_halts() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.check_cost(1e9), CircuitDecision::Continue);
    }

    #[test]
    fn test_budget_reached_halts() {
        let breaker = CircuitBreaker::new(Some(10.0), false);
        assert_eq!(breaker.check_cost(9.99), CircuitDecision::Continue);
        assert_eq!(
            breaker.check_cost(10.0),
            CircuitDecision::Halt(TerminationReason::CostLimitReached {
                spent: 10.0,
                budget: 10.0
            })
        );
    }

    #[test]
    fn test_critical_only_halts_with_fail_fast() {
        let summary = WarningSummary {
            critical: 2,
            has_critical: true,
            ..Default::default()
        };
        assert!(!CircuitBreaker::new(None, false)
            .check_warnings(&summary)
            .is_halt());
        assert_eq!(
            CircuitBreaker::new(None, true).check_warnings(&summary),
            CircuitDecision::Halt(TerminationReason::CriticalWarning { count: 2 })
        );
    }

    #[test]
    fn test_contradiction_criticals_do_not_halt() {
        let summary = WarningSummary {
            critical: 1,
            has_critical: false,
            ..Default::default()
        };
        assert!(!CircuitBreaker::new(None, true)
            .check_warnings(&summary)
            .is_halt());
    }
}
