//! Concurrent evidence collection for one pass.
//!
//! Requests fan out over the worker pool. Each request gets a per-call
//! timeout and bounded retry with backoff; a request that still fails is
//! recorded as a note and its hypotheses simply receive no candidates.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CollaboratorError, DiscoveryError, DiscoveryResult};
use crate::evidence::Evidence;
use crate::governance::Candidate;
use crate::hypothesis::{Hypothesis, HypothesisSet};
use crate::ids::{EvidenceId, HypothesisId};
use crate::notes::{NoteKind, ProcessingNote};
use crate::runtime::{retry_with_backoff, CancellationToken, RuntimeConfig, WorkerPool};
use crate::services::{ContentRetriever, RetrievalRequest};
use crate::text;

/// A request that failed after every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFailure {
    pub request: RetrievalRequest,
    pub error: CollaboratorError,
}

/// Result of collecting one pass's requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    /// Candidates in request order.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<CollectionFailure>,
    pub notes: Vec<ProcessingNote>,
    /// Retriever calls made, retries included.
    pub retrieval_calls: usize,
}

/// Issues retrieval requests and turns their evidence into candidates.
#[derive(Clone)]
pub struct EvidenceCollector {
    retriever: Arc<dyn ContentRetriever>,
    runtime: RuntimeConfig,
}

impl EvidenceCollector {
    pub fn new(retriever: Arc<dyn ContentRetriever>, runtime: RuntimeConfig) -> Self {
        Self { retriever, runtime }
    }

    /// Runs every request of pass `pass`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Cancelled` if the token is cancelled while
    /// requests are outstanding.
    pub fn collect(
        &self,
        pass: u32,
        requests: Vec<RetrievalRequest>,
        hypotheses: &HypothesisSet,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<CollectionOutcome> {
        let results = pool
            .map(requests, cancel, |request| {
                let (result, calls) = self.fetch(&request, pool, cancel);
                (request, result, calls)
            })
            .map_err(|_| DiscoveryError::Cancelled { pass })?;

        let mut outcome = CollectionOutcome::default();
        let mut seen: HashSet<(HypothesisId, EvidenceId)> = HashSet::new();

        for (request, result, calls) in results {
            outcome.retrieval_calls += calls;
            match result {
                Ok(mut evidence) => {
                    evidence.truncate(request.max_results);
                    for item in evidence {
                        let Some(hypothesis) = attribute(&request, hypotheses, &item) else {
                            continue;
                        };
                        if !seen.insert((hypothesis.id, item.id)) {
                            debug!(
                                pass,
                                source = %item.source,
                                "evidence already collected this pass"
                            );
                            continue;
                        }
                        outcome.candidates.push(Candidate::new(hypothesis.clone(), item, pass));
                    }
                }
                Err(CollaboratorError::Cancelled) => return Err(DiscoveryError::Cancelled { pass }),
                Err(error) => {
                    let err = DiscoveryError::EvidenceCollection {
                        category: request.label(),
                        channel: request.channel.to_string(),
                        source: error.clone(),
                    };
                    warn!(pass, attempts = calls, error = %err, "evidence collection failed");
                    let mut note =
                        ProcessingNote::new(pass, NoteKind::EvidenceCollection, err.to_string());
                    if let [only] = request.categories.as_slice() {
                        note = note.for_category(only);
                    }
                    outcome.notes.push(note);
                    outcome.failures.push(CollectionFailure { request, error });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled { pass });
        }
        debug!(
            pass,
            candidates = outcome.candidates.len(),
            failures = outcome.failures.len(),
            calls = outcome.retrieval_calls,
            "collection finished"
        );
        Ok(outcome)
    }

    fn fetch(
        &self,
        request: &RetrievalRequest,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> (Result<Vec<Evidence>, CollaboratorError>, usize) {
        let timeout = self.runtime.call_timeout();
        let mut calls = 0;
        let result = retry_with_backoff("retrieve", &self.runtime.retry, cancel, |_| {
            calls += 1;
            let retriever = Arc::clone(&self.retriever);
            let request = request.clone();
            pool.call_with_timeout("retrieve", timeout, move || retriever.retrieve(&request))
                .and_then(|found| found)
        });
        (result, calls)
    }
}

/// Picks the hypothesis an evidence item belongs to. For combination
/// requests this is the covered hypothesis with the most keyword hits, the
/// first one on a tie.
fn attribute<'a>(
    request: &RetrievalRequest,
    hypotheses: &'a HypothesisSet,
    evidence: &Evidence,
) -> Option<&'a Hypothesis> {
    let covered: Vec<&Hypothesis> = request
        .categories
        .iter()
        .filter_map(|c| hypotheses.get(c))
        .collect();
    if covered.len() <= 1 {
        return covered.first().copied();
    }
    let mut best: Option<(&Hypothesis, usize)> = None;
    for h in covered {
        let hits = text::keyword_hits(&evidence.content, &h.keywords);
        if best.map_or(true, |(_, b)| hits > b) {
            best = Some((h, hits));
        }
    }
    best.map(|(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::catalog::{CapabilityCatalog, Category};
    use crate::entity::EntityId;
    use crate::evidence::ChannelType;
    use crate::hypothesis::HypothesisOrigin;
    use crate::runtime::RetryPolicy;
    use crate::services::ScriptedRetriever;

    fn set(categories: &[&str]) -> HypothesisSet {
        let catalog = CapabilityCatalog::default();
        let entity = EntityId::new("acme");
        let mut set = HypothesisSet::new();
        for c in categories {
            let entry = catalog.get(&Category::new(c)).unwrap();
            set.merge(Hypothesis::new(&entity, entry, "s", 0.5, HypothesisOrigin::Dossier));
        }
        set
    }

    fn request(categories: &[&str], channel: ChannelType, max_results: usize) -> RetrievalRequest {
        RetrievalRequest {
            entity_id: EntityId::new("acme"),
            pass: 1,
            channel,
            categories: categories.iter().map(|c| Category::new(c)).collect(),
            statement: String::new(),
            keywords: Vec::new(),
            depth: 2,
            max_results,
        }
    }

    fn evidence(source: &str, content: &str) -> Evidence {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        Evidence::new(source, ChannelType::Press, content, 0.9, at)
    }

    fn fast_runtime() -> RuntimeConfig {
        RuntimeConfig {
            max_in_flight: 4,
            call_timeout_ms: 1_000,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                multiplier: 2.0,
                max_backoff_ms: 4,
            },
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let retriever = ScriptedRetriever::new()
            .respond("crm", ChannelType::Press, evidence("p", "crm news"))
            .fail_times("crm", ChannelType::Press, CollaboratorError::transient("503"), 2);
        let collector = EvidenceCollector::new(Arc::new(retriever), fast_runtime());
        let outcome = collector
            .collect(
                1,
                vec![request(&["crm"], ChannelType::Press, 6)],
                &set(&["crm"]),
                &WorkerPool::new(2),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.retrieval_calls, 3);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn exhausted_retries_become_a_note() {
        let retriever = ScriptedRetriever::new().fail_always(
            "crm",
            ChannelType::Careers,
            CollaboratorError::Timeout {
                operation: "retrieve".into(),
                duration_ms: 10,
            },
        );
        let collector = EvidenceCollector::new(Arc::new(retriever), fast_runtime());
        let outcome = collector
            .collect(
                1,
                vec![request(&["crm"], ChannelType::Careers, 6)],
                &set(&["crm"]),
                &WorkerPool::new(2),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.retrieval_calls, 3);
        assert_eq!(outcome.notes[0].kind, NoteKind::EvidenceCollection);
        assert_eq!(outcome.notes[0].category, Some(Category::new("crm")));
    }

    #[test]
    fn slow_retriever_times_out() {
        let retriever = ScriptedRetriever::new()
            .respond("crm", ChannelType::Press, evidence("p", "crm"))
            .with_delay(Duration::from_millis(200));
        let mut runtime = fast_runtime();
        runtime.call_timeout_ms = 20;
        runtime.retry.max_attempts = 1;
        let collector = EvidenceCollector::new(Arc::new(retriever), runtime);
        let outcome = collector
            .collect(
                1,
                vec![request(&["crm"], ChannelType::Press, 6)],
                &set(&["crm"]),
                &WorkerPool::new(1),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(matches!(outcome.failures[0].error, CollaboratorError::Timeout { .. }));
    }

    #[test]
    fn evidence_is_truncated_and_deduplicated() {
        let retriever = ScriptedRetriever::new()
            .respond("crm", ChannelType::Press, evidence("a", "crm one"))
            .respond("crm", ChannelType::Press, evidence("b", "crm two"))
            .respond("crm", ChannelType::Press, evidence("c", "crm three"))
            .respond("crm", ChannelType::Careers, evidence("a", "crm one"));
        let collector = EvidenceCollector::new(Arc::new(retriever), fast_runtime());
        let outcome = collector
            .collect(
                1,
                vec![
                    request(&["crm"], ChannelType::Press, 2),
                    request(&["crm"], ChannelType::Careers, 2),
                ],
                &set(&["crm"]),
                &WorkerPool::new(2),
                &CancellationToken::new(),
            )
            .unwrap();
        let sources: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|c| c.evidence.source.as_str())
            .collect();
        assert_eq!(sources, vec!["a", "b"]);
    }

    #[test]
    fn combination_evidence_goes_to_best_keyword_match() {
        let hypotheses = set(&["crm", "ticketing"]);
        let req = request(&["crm", "ticketing"], ChannelType::Press, 6);
        let tickets = evidence("x", "season ticket and box office upgrade, plus crm");
        let crm = evidence("y", "salesforce crm for customer data");
        let neither = evidence("z", "stadium roof repairs");
        assert_eq!(attribute(&req, &hypotheses, &tickets).unwrap().category.as_str(), "ticketing");
        assert_eq!(attribute(&req, &hypotheses, &crm).unwrap().category.as_str(), "crm");
        assert_eq!(attribute(&req, &hypotheses, &neither).unwrap().category.as_str(), "crm");
    }

    #[test]
    fn cancellation_discards_the_batch() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let retriever = ScriptedRetriever::new()
            .respond("crm", ChannelType::Press, evidence("p", "crm"))
            .with_hook(move |_| trigger.cancel());
        let collector = EvidenceCollector::new(Arc::new(retriever), fast_runtime());
        let err = collector
            .collect(
                2,
                vec![request(&["crm"], ChannelType::Press, 6)],
                &set(&["crm"]),
                &WorkerPool::new(1),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled { pass: 2 }));
    }
}
