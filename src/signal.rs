//! Signals: hypothesis and evidence pairs after a governance decision.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::evidence::Evidence;
use crate::ids::{EvidenceId, HypothesisId, SignalId};

/// Outcome of the governance loop for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    WeakAccept,
    Reject,
    /// No candidate evidence for the hypothesis in this pass.
    NoProgress,
    /// The category was closed after repeated rejections.
    Saturated,
}

impl Decision {
    /// Returns true for decisions that move confidence.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Accept | Self::WeakAccept)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::WeakAccept => write!(f, "WEAK_ACCEPT"),
            Self::Reject => write!(f, "REJECT"),
            Self::NoProgress => write!(f, "NO_PROGRESS"),
            Self::Saturated => write!(f, "SATURATED"),
        }
    }
}

/// How the decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Confirmed by the reasoning service.
    Validated,
    /// Reasoning service unavailable; rule filter outcome only.
    Unvalidated,
    /// Stopped by the rule filter before reasoning.
    RuleFilter,
    /// Produced by category bookkeeping (NO_PROGRESS, SATURATED).
    Bookkeeping,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => write!(f, "validated"),
            Self::Unvalidated => write!(f, "unvalidated"),
            Self::RuleFilter => write!(f, "rule_filter"),
            Self::Bookkeeping => write!(f, "bookkeeping"),
        }
    }
}

/// A decided signal. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub hypothesis_id: HypothesisId,
    pub category: Category,
    pub evidence: Vec<Evidence>,
    pub decision: Decision,
    pub pass: u32,
    pub decided_at: DateTime<Utc>,
    pub provenance: Provenance,

    /// Strength of the signal in [0, 1]; used for episode persistence.
    pub confidence: f64,

    /// Human-readable explanation of the decision.
    pub rationale: String,
}

impl Signal {
    /// Returns true if this signal is counted by the aggregator.
    #[must_use]
    pub const fn counts_toward_confidence(&self) -> bool {
        self.decision.is_positive()
    }

    /// Returns true if the reasoning service did not confirm this signal.
    #[must_use]
    pub fn is_unvalidated(&self) -> bool {
        self.provenance == Provenance::Unvalidated
    }

    /// Source of the lead evidence, if any.
    #[must_use]
    pub fn lead_source(&self) -> Option<&str> {
        self.evidence.first().map(|e| e.source.as_str())
    }
}

/// A candidate folded into an earlier signal by deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDuplicate {
    pub evidence_id: EvidenceId,
    pub category: Category,
    pub source: String,
    pub merged_into: SignalId,
    pub similarity: f64,
    pub pass: u32,
}
