//! The governance loop: turns the candidates of one pass into decided
//! signals.
//!
//! Stages 1 and 2 (rule filter and reasoning) are independent per candidate
//! and run on the worker pool. Stages 3 and 4 (dedup and bookkeeping) share
//! state, so they run afterwards in canonical candidate order against the
//! category ledger. The resulting signals do not depend on the order the
//! pool finished in.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::Category;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::governance::dedup::DedupIndex;
use crate::governance::ledger::{CategoryLedger, LedgerOutcome, LedgerState};
use crate::governance::state::{self, Candidate, Deduplicated, Reasoned, ValidationOutcome};
use crate::hypothesis::Hypothesis;
use crate::ids::HypothesisId;
use crate::notes::{NoteKind, ProcessingNote};
use crate::runtime::{retry_with_backoff, CancellationToken, RuntimeConfig, WorkerPool};
use crate::services::ReasoningValidator;
use crate::signal::{Decision, MergedDuplicate, Signal};
use crate::time::Clock;

/// Thresholds of the governance loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Evidence below this credibility is rejected by the rule filter.
    pub min_credibility: f64,
    /// Jaccard similarity above which evidence is a duplicate.
    pub dedup_similarity: f64,
    /// Consecutive rejects that saturate a category.
    pub saturation_rejects: u32,
    /// Rule-only fallback accepts at or above this credibility.
    pub fallback_accept_credibility: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            min_credibility: 0.70,
            dedup_similarity: 0.85,
            saturation_rejects: 3,
            fallback_accept_credibility: 0.90,
        }
    }
}

/// Inputs for one pass.
#[derive(Debug)]
pub struct PassInput<'a> {
    pub pass: u32,
    /// Hypotheses the pass focused on; those without candidates get
    /// NO_PROGRESS.
    pub focus: &'a [Hypothesis],
    pub candidates: Vec<Candidate>,
    /// Signals of earlier passes, for deduplication.
    pub prior_signals: &'a [Signal],
    /// Ledger state at the start of the pass.
    pub ledger: LedgerState,
}

/// Everything the loop decided in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernanceOutcome {
    pub signals: Vec<Signal>,
    pub merged: Vec<MergedDuplicate>,
    pub notes: Vec<ProcessingNote>,
    /// Ledger state at the end of the pass.
    pub ledger: LedgerState,
    pub newly_saturated: Vec<Category>,
    /// Reasoning service calls, retries included.
    pub validation_calls: usize,
}

/// Runs the four governance stages over a pass's candidates.
#[derive(Clone)]
pub struct GovernanceLoop {
    config: GovernanceConfig,
    validator: Arc<dyn ReasoningValidator>,
    runtime: RuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl GovernanceLoop {
    pub fn new(
        config: GovernanceConfig,
        validator: Arc<dyn ReasoningValidator>,
        runtime: RuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            validator,
            runtime,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Decides every candidate of a pass.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Cancelled` if the token is cancelled before
    /// the pass resolves (nothing is kept), or `DiscoveryError::Internal` if
    /// the ledger lock is poisoned.
    pub fn run(
        &self,
        input: PassInput<'_>,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<GovernanceOutcome> {
        let PassInput {
            pass,
            focus,
            candidates,
            prior_signals,
            ledger,
        } = input;

        let mut per_hypothesis: BTreeMap<HypothesisId, usize> = BTreeMap::new();
        for candidate in &candidates {
            *per_hypothesis.entry(candidate.hypothesis.id).or_default() += 1;
        }

        let screened = pool
            .map(candidates, cancel, |candidate| self.screen(candidate, pool, cancel))
            .map_err(|_| DiscoveryError::Cancelled { pass })?;

        let mut outcome = GovernanceOutcome::default();
        let mut reasoned: Vec<Reasoned> = Vec::with_capacity(screened.len());
        for (r, calls) in screened {
            outcome.validation_calls += calls;
            reasoned.push(r);
        }
        reasoned.sort_by(|a, b| a.candidate.canonical_key().cmp(&b.candidate.canonical_key()));

        let ledger = CategoryLedger::new(self.config.saturation_rejects, ledger);
        let mut index = DedupIndex::from_signals(self.config.dedup_similarity, prior_signals);
        let decided_at = self.clock.now();

        for r in reasoned {
            let category = r.candidate.hypothesis.category.clone();

            if let Some(err) = &r.validation_error {
                let error = DiscoveryError::ValidationService {
                    category: category.to_string(),
                    source: err.clone(),
                };
                warn!(
                    pass,
                    category = %category,
                    error = %error,
                    "reasoning unavailable, using rule filter outcome"
                );
                outcome.notes.push(
                    ProcessingNote::new(
                        pass,
                        NoteKind::ValidationService,
                        format!("{error}; {} tagged unvalidated", r.candidate.evidence.source),
                    )
                    .for_category(&category),
                );
            }

            if ledger.is_saturated(&category)? {
                let signal = state::decide(r, LedgerOutcome::AlreadySaturated, decided_at);
                outcome.notes.push(
                    ProcessingNote::new(pass, NoteKind::Saturated, signal.rationale.clone())
                        .for_category(&category),
                );
                outcome.signals.push(signal);
                continue;
            }

            let r = match state::deduplicate(r, &index) {
                Deduplicated::Merged(dup) => {
                    debug!(
                        pass,
                        category = %category,
                        similarity = dup.similarity,
                        "merged duplicate evidence"
                    );
                    outcome.notes.push(
                        ProcessingNote::new(
                            pass,
                            NoteKind::MergedDuplicate,
                            format!(
                                "evidence from {} merged into signal {} (similarity {:.2})",
                                dup.source, dup.merged_into, dup.similarity
                            ),
                        )
                        .for_category(&category),
                    );
                    outcome.merged.push(dup);
                    continue;
                }
                Deduplicated::Unique(r) => r,
            };

            let ledger_outcome = ledger.record(&category, r.decision)?;
            let signal = state::decide(r, ledger_outcome, decided_at);
            debug!(
                pass,
                category = %category,
                decision = %signal.decision,
                provenance = %signal.provenance,
                "signal decided"
            );

            if signal.counts_toward_confidence() {
                index.insert(&signal);
            }
            if signal.decision == Decision::Reject {
                outcome.notes.push(
                    ProcessingNote::new(pass, NoteKind::Rejected, signal.rationale.clone())
                        .for_category(&category),
                );
            }
            if let LedgerOutcome::NewlySaturated { streak } = ledger_outcome {
                outcome.notes.push(
                    ProcessingNote::new(
                        pass,
                        NoteKind::Saturated,
                        format!("category closed after {streak} consecutive rejects"),
                    )
                    .for_category(&category),
                );
                outcome.newly_saturated.push(category);
            }
            outcome.signals.push(signal);
        }

        for hypothesis in focus {
            if per_hypothesis.contains_key(&hypothesis.id) {
                continue;
            }
            let signal = state::no_progress(
                hypothesis,
                pass,
                decided_at,
                "no candidate evidence this pass",
            );
            outcome.notes.push(
                ProcessingNote::new(pass, NoteKind::NoProgress, signal.rationale.clone())
                    .for_category(&hypothesis.category),
            );
            outcome.signals.push(signal);
        }

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled { pass });
        }

        outcome.ledger = ledger.into_state()?;
        Ok(outcome)
    }

    /// Stages 1 and 2 for one candidate. Returns the reasoned state and the
    /// number of reasoning calls made.
    fn screen(
        &self,
        candidate: Candidate,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> (Reasoned, usize) {
        let checked = state::rule_check(candidate, &self.config);
        if !checked.passed() {
            return (state::reason(checked, ValidationOutcome::NotRequested, &self.config), 0);
        }
        let (validation, calls) = self.validate(&checked.candidate, pool, cancel);
        (state::reason(checked, validation, &self.config), calls)
    }

    fn validate(
        &self,
        candidate: &Candidate,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> (ValidationOutcome, usize) {
        let timeout = self.runtime.call_timeout();
        let mut calls = 0;
        let result = retry_with_backoff("validate", &self.runtime.retry, cancel, |_| {
            calls += 1;
            let validator = Arc::clone(&self.validator);
            let hypothesis = candidate.hypothesis.clone();
            let evidence = candidate.evidence.clone();
            pool.call_with_timeout("validate", timeout, move || {
                validator.validate(&hypothesis, &evidence)
            })
            .and_then(|verdict| verdict)
        });
        match result {
            Ok(verdict) => (ValidationOutcome::Verdict(verdict), calls),
            Err(err) => (ValidationOutcome::Unavailable(err), calls),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::catalog::CapabilityCatalog;
    use crate::entity::EntityId;
    use crate::evidence::{ChannelType, Evidence};
    use crate::hypothesis::HypothesisOrigin;
    use crate::services::{ScriptedValidator, Verdict};
    use crate::signal::Provenance;
    use crate::time::FixedClock;

    fn hypothesis(category: &str) -> Hypothesis {
        let catalog = CapabilityCatalog::default();
        let entry = catalog.get(&Category::new(category)).unwrap();
        Hypothesis::new(&EntityId::new("acme"), entry, "s", 0.5, HypothesisOrigin::Dossier)
    }

    fn evidence(source: &str, content: &str, credibility: f64) -> Evidence {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        Evidence::new(source, ChannelType::Press, content, credibility, at)
    }

    fn engine(validator: ScriptedValidator) -> GovernanceLoop {
        let runtime = RuntimeConfig {
            retry: crate::runtime::RetryPolicy {
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                ..crate::runtime::RetryPolicy::default()
            },
            ..RuntimeConfig::default()
        };
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap());
        GovernanceLoop::new(
            GovernanceConfig::default(),
            Arc::new(validator),
            runtime,
            Arc::new(clock),
        )
    }

    fn input<'a>(
        focus: &'a [Hypothesis],
        candidates: Vec<Candidate>,
        prior: &'a [Signal],
    ) -> PassInput<'a> {
        PassInput {
            pass: 1,
            focus,
            candidates,
            prior_signals: prior,
            ledger: LedgerState::default(),
        }
    }

    #[test]
    fn mixed_pass_produces_all_decisions() {
        let crm = hypothesis("crm");
        let ticketing = hypothesis("ticketing");
        let app = hypothesis("mobile_app");
        let focus = vec![crm.clone(), ticketing.clone(), app];

        let validator =
            ScriptedValidator::accepting().verdict_for("blog", Verdict::weak_accept("indirect"));
        let candidates = vec![
            Candidate::new(crm.clone(), evidence("press", "Acme picks a CRM vendor", 0.9), 1),
            Candidate::new(crm, evidence("blog", "Customer data platform and CRM plans", 0.8), 1),
            Candidate::new(ticketing, evidence("forum", "New tickets released", 0.3), 1),
        ];

        let outcome = engine(validator)
            .run(input(&focus, candidates, &[]), &WorkerPool::new(4), &CancellationToken::new())
            .unwrap();

        let decisions: Vec<Decision> = outcome.signals.iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            vec![Decision::WeakAccept, Decision::Accept, Decision::Reject, Decision::NoProgress]
        );
        assert_eq!(outcome.validation_calls, 2);
        assert!(outcome.notes.iter().any(|n| n.kind == NoteKind::Rejected));
        assert!(outcome.notes.iter().any(|n| n.kind == NoteKind::NoProgress));
    }

    #[test]
    fn three_rejects_saturate_and_close_category() {
        let crm = hypothesis("crm");
        let focus = vec![crm.clone()];
        let candidates: Vec<Candidate> = ["a", "b", "c", "d"]
            .iter()
            .map(|src| Candidate::new(crm.clone(), evidence(src, "crm rumours", 0.2), 1))
            .collect();

        let outcome = engine(ScriptedValidator::accepting())
            .run(input(&focus, candidates, &[]), &WorkerPool::new(2), &CancellationToken::new())
            .unwrap();

        let decisions: Vec<Decision> = outcome.signals.iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            vec![Decision::Reject, Decision::Reject, Decision::Reject, Decision::Saturated]
        );
        assert_eq!(outcome.newly_saturated, vec![Category::new("crm")]);
        assert!(outcome.ledger.saturated.contains(&Category::new("crm")));
        assert_eq!(outcome.validation_calls, 0);
    }

    #[test]
    fn unavailable_reasoning_is_noted_and_unvalidated() {
        let crm = hypothesis("crm");
        let focus = vec![crm.clone()];
        let candidates = vec![Candidate::new(crm, evidence("press", "Acme CRM tender", 0.95), 1)];

        let outcome = engine(ScriptedValidator::unavailable())
            .run(input(&focus, candidates, &[]), &WorkerPool::new(2), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.signals[0].decision, Decision::Accept);
        assert_eq!(outcome.signals[0].provenance, Provenance::Unvalidated);
        assert!(outcome.notes.iter().any(|n| n.kind == NoteKind::ValidationService));
        // Unavailable is not retryable: one call only.
        assert_eq!(outcome.validation_calls, 1);
    }

    #[test]
    fn duplicates_of_earlier_passes_do_not_count() {
        let crm = hypothesis("crm");
        let focus = vec![crm.clone()];
        let first = engine(ScriptedValidator::accepting())
            .run(
                input(
                    &focus,
                    vec![Candidate::new(
                        crm.clone(),
                        evidence("press", "Acme CRM tender opens", 0.9),
                        1,
                    )],
                    &[],
                ),
                &WorkerPool::new(1),
                &CancellationToken::new(),
            )
            .unwrap();

        let mut second_input = input(
            &focus,
            vec![Candidate::new(crm, evidence("press", "Acme CRM tender opens.", 0.9), 2)],
            &first.signals,
        );
        second_input.pass = 2;
        let second = engine(ScriptedValidator::accepting())
            .run(second_input, &WorkerPool::new(1), &CancellationToken::new())
            .unwrap();

        assert!(second.signals.is_empty());
        assert_eq!(second.merged.len(), 1);
        assert_eq!(second.merged[0].merged_into, first.signals[0].id);
    }

    #[test]
    fn candidate_order_does_not_change_outcome() {
        let crm = hypothesis("crm");
        let focus = vec![crm.clone()];
        let make = |sources: &[&str]| -> Vec<Candidate> {
            sources
                .iter()
                .map(|s| {
                    let credibility = if *s == "b" { 0.9 } else { 0.1 };
                    let content = format!("{s} crm");
                    Candidate::new(crm.clone(), evidence(s, &content, credibility), 1)
                })
                .collect()
        };
        let run = |order: &[&str]| {
            engine(ScriptedValidator::accepting())
                .run(
                    input(&focus, make(order), &[]),
                    &WorkerPool::new(3),
                    &CancellationToken::new(),
                )
                .unwrap()
        };
        let forward = run(&["a", "b", "c", "d"]);
        let backward = run(&["d", "c", "b", "a"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn cancelled_pass_returns_error() {
        let crm = hypothesis("crm");
        let focus = vec![crm.clone()];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(ScriptedValidator::accepting())
            .run(
                input(&focus, vec![Candidate::new(crm, evidence("p", "crm", 0.9), 1)], &[]),
                &WorkerPool::new(1),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled { pass: 1 }));
    }
}
