//! Per-candidate state machine.
//!
//! A candidate moves `Candidate -> RuleChecked -> Reasoned -> Deduplicated ->
//! Decided`. Each arrow is a pure function over the previous state plus the
//! external input for that stage (a verdict, the dedup index, a ledger
//! outcome), so every stage can be tested without live collaborators.

use chrono::{DateTime, Utc};

use crate::catalog::Category;
use crate::confidence::round_score;
use crate::error::CollaboratorError;
use crate::evidence::Evidence;
use crate::governance::dedup::DedupIndex;
use crate::governance::engine::GovernanceConfig;
use crate::governance::ledger::LedgerOutcome;
use crate::hypothesis::Hypothesis;
use crate::ids::{EvidenceId, SignalId};
use crate::services::Verdict;
use crate::signal::{Decision, MergedDuplicate, Provenance, Signal};
use crate::text;

/// A hypothesis and one evidence item awaiting governance.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub hypothesis: Hypothesis,
    pub evidence: Evidence,
    pub pass: u32,
}

impl Candidate {
    #[must_use]
    pub fn new(hypothesis: Hypothesis, evidence: Evidence, pass: u32) -> Self {
        Self {
            hypothesis,
            evidence,
            pass,
        }
    }

    /// Key that fixes the order stages 3 and 4 see candidates in.
    #[must_use]
    pub fn canonical_key(&self) -> (Category, String, EvidenceId) {
        (
            self.hypothesis.category.clone(),
            self.evidence.source.clone(),
            self.evidence.id,
        )
    }
}

/// Result of the rule filter.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Passed { keyword_hits: usize },
    Rejected { reason: String },
}

/// State after stage 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleChecked {
    pub candidate: Candidate,
    pub outcome: RuleOutcome,
}

impl RuleChecked {
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Passed { .. })
    }
}

/// What the reasoning service said, if it was asked.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The rule filter already rejected the candidate.
    NotRequested,
    Verdict(Verdict),
    Unavailable(CollaboratorError),
}

/// State after stage 2.
#[derive(Debug, Clone, PartialEq)]
pub struct Reasoned {
    pub candidate: Candidate,
    pub decision: Decision,
    pub provenance: Provenance,
    pub rationale: String,
    pub confidence: f64,

    /// Set when the reasoning service could not be reached.
    pub validation_error: Option<CollaboratorError>,
}

/// State after stage 3.
#[derive(Debug, Clone, PartialEq)]
pub enum Deduplicated {
    Unique(Reasoned),
    Merged(MergedDuplicate),
}

/// Stage 1: reject low-credibility evidence and evidence that mentions none
/// of the hypothesis keywords.
#[must_use]
pub fn rule_check(candidate: Candidate, config: &GovernanceConfig) -> RuleChecked {
    let credibility = candidate.evidence.credibility;
    if credibility < config.min_credibility {
        let reason = format!(
            "credibility {credibility:.2} below {:.2} ({})",
            config.min_credibility, candidate.evidence.source
        );
        return RuleChecked {
            candidate,
            outcome: RuleOutcome::Rejected { reason },
        };
    }

    let keyword_hits =
        text::keyword_hits(&candidate.evidence.content, &candidate.hypothesis.keywords);
    if keyword_hits == 0 {
        let reason = format!(
            "no {} keywords in evidence from {}",
            candidate.hypothesis.category, candidate.evidence.source
        );
        return RuleChecked {
            candidate,
            outcome: RuleOutcome::Rejected { reason },
        };
    }

    RuleChecked {
        candidate,
        outcome: RuleOutcome::Passed { keyword_hits },
    }
}

/// Stage 2: fold the reasoning verdict into a decision.
///
/// Without a verdict the rule-only outcome is used: ACCEPT when credibility
/// reaches `fallback_accept_credibility`, WEAK_ACCEPT otherwise, tagged
/// unvalidated.
#[must_use]
pub fn reason(
    checked: RuleChecked,
    validation: ValidationOutcome,
    config: &GovernanceConfig,
) -> Reasoned {
    let RuleChecked { candidate, outcome } = checked;
    let credibility = candidate.evidence.credibility;

    if let RuleOutcome::Rejected { reason } = outcome {
        return Reasoned {
            candidate,
            decision: Decision::Reject,
            provenance: Provenance::RuleFilter,
            rationale: reason,
            confidence: credibility,
            validation_error: None,
        };
    }

    let validation_error = match validation {
        ValidationOutcome::Verdict(verdict) => {
            return Reasoned {
                decision: verdict.decision.into(),
                provenance: Provenance::Validated,
                rationale: verdict.rationale,
                confidence: round_score(verdict.confidence.unwrap_or(credibility)),
                validation_error: None,
                candidate,
            };
        }
        ValidationOutcome::Unavailable(err) => Some(err),
        ValidationOutcome::NotRequested => None,
    };

    let decision = if credibility >= config.fallback_accept_credibility {
        Decision::Accept
    } else {
        Decision::WeakAccept
    };
    Reasoned {
        candidate,
        decision,
        provenance: Provenance::Unvalidated,
        rationale: format!("rule filter only, credibility {credibility:.2}"),
        confidence: credibility,
        validation_error,
    }
}

/// Stage 3: merge positive decisions that repeat an earlier signal of the
/// same hypothesis and source.
#[must_use]
pub fn deduplicate(reasoned: Reasoned, index: &DedupIndex) -> Deduplicated {
    if !reasoned.decision.is_positive() {
        return Deduplicated::Unique(reasoned);
    }
    let candidate = &reasoned.candidate;
    let found = index.find(
        candidate.hypothesis.id,
        &candidate.evidence.source,
        &candidate.evidence.content,
    );
    match found {
        Some((merged_into, similarity)) => Deduplicated::Merged(MergedDuplicate {
            evidence_id: candidate.evidence.id,
            category: candidate.hypothesis.category.clone(),
            source: candidate.evidence.source.clone(),
            merged_into,
            similarity,
            pass: candidate.pass,
        }),
        None => Deduplicated::Unique(reasoned),
    }
}

/// Stage 4: apply the ledger outcome and produce the immutable signal.
#[must_use]
pub fn decide(reasoned: Reasoned, ledger: LedgerOutcome, decided_at: DateTime<Utc>) -> Signal {
    let Reasoned {
        candidate,
        mut decision,
        mut provenance,
        mut rationale,
        confidence,
        ..
    } = reasoned;

    if ledger == LedgerOutcome::AlreadySaturated {
        rationale = format!(
            "category {} is saturated; was {decision}",
            candidate.hypothesis.category
        );
        decision = Decision::Saturated;
        provenance = Provenance::Bookkeeping;
    }

    Signal {
        id: SignalId::derive(
            candidate.hypothesis.id,
            candidate.pass,
            &candidate.evidence.id.to_string(),
        ),
        hypothesis_id: candidate.hypothesis.id,
        category: candidate.hypothesis.category,
        evidence: vec![candidate.evidence],
        decision,
        pass: candidate.pass,
        decided_at,
        provenance,
        confidence,
        rationale,
    }
}

/// Signal for a focused hypothesis that received no candidates.
#[must_use]
pub fn no_progress(
    hypothesis: &Hypothesis,
    pass: u32,
    decided_at: DateTime<Utc>,
    reason: &str,
) -> Signal {
    Signal {
        id: SignalId::derive(hypothesis.id, pass, "no_progress"),
        hypothesis_id: hypothesis.id,
        category: hypothesis.category.clone(),
        evidence: Vec::new(),
        decision: Decision::NoProgress,
        pass,
        decided_at,
        provenance: Provenance::Bookkeeping,
        confidence: 0.0,
        rationale: reason.to_string(),
    }
}
