//! The multi-pass discovery loop.
//!
//! Each pass plans a strategy, collects evidence concurrently, runs the
//! governance loop, folds the decisions into the confidence state and asks
//! the stopping evaluator whether to continue. Passes are strictly
//! sequential; a cancelled pass is discarded as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{CapabilityCatalog, Category};
use crate::collector::EvidenceCollector;
use crate::confidence::{ConfidenceAggregator, ConfidenceBand, ConfidenceState, DecisionTally};
use crate::config::{DiscoveryConfig, DiscoveryOptions};
use crate::entity::{normalize_vertical, EntityId, EntityProfile};
use crate::error::{CollaboratorError, DiscoveryError, DiscoveryResult, InputError};
use crate::governance::{GovernanceLoop, LedgerState, PassInput};
use crate::hypothesis::{Hypothesis, HypothesisGenerator, HypothesisSet, TemplateLibrary};
use crate::network::NetworkContextProvider;
use crate::notes::{NoteKind, ProcessingNote};
use crate::progress::{NullProgress, ProgressEvent, ProgressSink};
use crate::report::{OpportunityReport, ReportBuilder, ReportMetadata};
use crate::runtime::{CancellationToken, WorkerPool};
use crate::services::{ContentRetriever, ProfileSupplier, ReasoningValidator, StaticProfiles};
use crate::signal::{Decision, MergedDuplicate, Signal};
use crate::stopping::{StopInputs, StopReason, StoppingEvaluator};
use crate::storage::{DiscoveryRepository, EpisodeStore, RelationshipGraph};
use crate::strategy::{PassStrategy, PassStrategyPlanner, PlanningContext};
use crate::temporal::{TemporalContext, TemporalContextProvider};
use crate::time::{Clock, SystemClock};

/// Boosts folded into a pass's confidence update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedBoosts {
    pub temporal: f64,
    pub network: f64,
}

impl AppliedBoosts {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.temporal + self.network
    }
}

/// Everything one completed pass produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    pub pass: u32,
    pub strategy: PassStrategy,
    pub signals: Vec<Signal>,
    pub merged: Vec<MergedDuplicate>,
    pub confidence_before: f64,
    pub confidence_after: f64,
    pub delta: f64,
    pub band: ConfidenceBand,
    /// Hypotheses that entered the active set during this pass.
    pub new_hypotheses: Vec<Hypothesis>,
    pub boosts: AppliedBoosts,
    pub notes: Vec<ProcessingNote>,
    pub retrieval_calls: usize,
    pub validation_calls: usize,
}

impl PassResult {
    /// Signals with the given decision.
    pub fn signals_with(&self, decision: Decision) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(move |s| s.decision == decision)
    }
}

/// Outcome of a discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPassResult {
    pub entity_id: EntityId,
    /// Completed passes; a cancelled pass is not included.
    pub passes: Vec<PassResult>,
    pub final_state: ConfidenceState,
    pub hypotheses: Vec<Hypothesis>,
    pub stop_reason: StopReason,
    pub notes: Vec<ProcessingNote>,
    pub report: OpportunityReport,
}

impl MultiPassResult {
    /// Every signal of every completed pass.
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.passes.iter().flat_map(|p| p.signals.iter())
    }

    /// Confidence after the last completed pass.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.final_state.score
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    retriever: Arc<dyn ContentRetriever>,
    validator: Arc<dyn ReasoningValidator>,
    profiles: Arc<dyn ProfileSupplier>,
    catalog: CapabilityCatalog,
    templates: TemplateLibrary,
    episodes: Option<Arc<dyn EpisodeStore>>,
    graph: Option<Arc<dyn RelationshipGraph>>,
    repository: Option<Arc<dyn DiscoveryRepository>>,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    config: DiscoveryConfig,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn profiles(mut self, profiles: Arc<dyn ProfileSupplier>) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn catalog(mut self, catalog: CapabilityCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn episode_store(mut self, store: Arc<dyn EpisodeStore>) -> Self {
        self.episodes = Some(store);
        self
    }

    #[must_use]
    pub fn relationship_graph(mut self, graph: Arc<dyn RelationshipGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn DiscoveryRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and assembles the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Configuration` for an invalid configuration.
    pub fn build(self) -> DiscoveryResult<Orchestrator> {
        self.config.validate()?;
        let config = self.config;

        let temporal = self
            .episodes
            .map(|store| TemporalContextProvider::new(store, config.temporal.clone()));
        let network = self.graph.map(|graph| {
            NetworkContextProvider::new(graph, self.catalog.clone(), config.network.clone())
        });

        Ok(Orchestrator {
            collector: EvidenceCollector::new(self.retriever, config.runtime.clone()),
            governance: GovernanceLoop::new(
                config.governance.clone(),
                self.validator,
                config.runtime.clone(),
                Arc::clone(&self.clock),
            ),
            aggregator: ConfidenceAggregator::new(config.confidence.clone()),
            stopping: StoppingEvaluator::new(config.stopping.clone()),
            planner: PassStrategyPlanner::new(),
            generator: HypothesisGenerator::new(self.catalog, self.templates),
            pool: WorkerPool::new(config.runtime.max_in_flight),
            profiles: self.profiles,
            temporal,
            network,
            repository: self.repository,
            clock: self.clock,
            progress: self.progress,
            config,
        })
    }
}

/// Drives discovery runs.
pub struct Orchestrator {
    config: DiscoveryConfig,
    generator: HypothesisGenerator,
    profiles: Arc<dyn ProfileSupplier>,
    collector: EvidenceCollector,
    governance: GovernanceLoop,
    aggregator: ConfidenceAggregator,
    planner: PassStrategyPlanner,
    stopping: StoppingEvaluator,
    temporal: Option<TemporalContextProvider>,
    network: Option<NetworkContextProvider>,
    repository: Option<Arc<dyn DiscoveryRepository>>,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    pool: WorkerPool,
}

/// State carried from pass to pass.
struct RunState {
    hypotheses: HypothesisSet,
    confidence: ConfidenceState,
    signals: Vec<Signal>,
    passes: Vec<PassResult>,
    notes: Vec<ProcessingNote>,
    trend: Vec<f64>,
    retrieval_calls: usize,
    validation_calls: usize,
}

impl Orchestrator {
    /// Starts a builder with the two collaborators every run needs.
    #[must_use]
    pub fn builder(
        retriever: Arc<dyn ContentRetriever>,
        validator: Arc<dyn ReasoningValidator>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            retriever,
            validator,
            profiles: Arc::new(StaticProfiles::new()),
            catalog: CapabilityCatalog::default(),
            templates: TemplateLibrary::builtin(),
            episodes: None,
            graph: None,
            repository: None,
            clock: Arc::new(SystemClock),
            progress: Arc::new(NullProgress),
            config: DiscoveryConfig::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Runs discovery with up to two passes.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run_discovery`].
    pub fn quick_discovery(
        &self,
        entity_id: &EntityId,
        options: DiscoveryOptions,
    ) -> DiscoveryResult<MultiPassResult> {
        let max_passes = options.max_passes.min(2);
        self.run_discovery(entity_id, &options.with_max_passes(max_passes))
    }

    /// Runs discovery with four passes.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run_discovery`].
    pub fn full_discovery(
        &self,
        entity_id: &EntityId,
        options: DiscoveryOptions,
    ) -> DiscoveryResult<MultiPassResult> {
        self.run_discovery(entity_id, &options.with_max_passes(4))
    }

    /// Runs discovery for one entity.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid options and `Input` when no
    /// hypotheses can be generated. Collaborator failures during passes are
    /// absorbed into notes.
    pub fn run_discovery(
        &self,
        entity_id: &EntityId,
        options: &DiscoveryOptions,
    ) -> DiscoveryResult<MultiPassResult> {
        self.run_discovery_with_cancel(entity_id, options, &CancellationToken::new())
    }

    /// Runs discovery, honoring `cancel`.
    ///
    /// `request_stop` ends the run after the current pass. `cancel` abandons
    /// the current pass; the result reflects the passes completed before it.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run_discovery`].
    pub fn run_discovery_with_cancel(
        &self,
        entity_id: &EntityId,
        options: &DiscoveryOptions,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<MultiPassResult> {
        let max_passes = options.validate()?;
        if entity_id.as_str().trim().is_empty() {
            return Err(InputError::EmptyEntityId.into());
        }
        let started_at = self.clock.now();

        let mut run = RunState {
            hypotheses: HypothesisSet::new(),
            confidence: self.aggregator.initial_state(),
            signals: Vec::new(),
            passes: Vec::new(),
            notes: Vec::new(),
            trend: Vec::new(),
            retrieval_calls: 0,
            validation_calls: 0,
        };
        run.trend.push(run.confidence.score);

        let profile = self.fetch_profile(entity_id, options, &mut run.notes);
        let generated = self
            .generator
            .generate(entity_id, profile.as_ref(), options.vertical.as_deref())?;
        run.hypotheses.merge_all(generated);

        info!(
            entity = %entity_id,
            hypotheses = run.hypotheses.len(),
            max_passes,
            "discovery started"
        );
        self.progress.publish(ProgressEvent::RunStarted {
            entity_id: entity_id.clone(),
            hypotheses: run.hypotheses.len(),
            max_passes,
        });

        let temporal = if options.include_temporal {
            self.temporal_context(entity_id, &run.hypotheses, &mut run.notes)
        } else {
            None
        };
        let favored = temporal
            .as_ref()
            .zip(self.temporal.as_ref())
            .map(|(ctx, provider)| ctx.favored(provider.config().favored_threshold))
            .unwrap_or_default();

        let mut network_derived: Vec<Category> = Vec::new();
        let mut stop_reason = StopReason::MaxPasses;

        for pass in 1..=max_passes {
            let apply_network =
                options.include_network && (pass == 2 || (pass == 1 && max_passes == 1));
            let mut working = run.hypotheses.clone();
            let mut notes = Vec::new();
            let mut boosts = AppliedBoosts::default();
            if pass == 1 {
                boosts.temporal = temporal.as_ref().map_or(0.0, |t| t.boost);
            }
            let mut new_hypotheses = Vec::new();
            if apply_network {
                if let Some((derived, boost)) = self.network_context(
                    entity_id,
                    &working,
                    &run.confidence.saturated,
                    pass,
                    &mut notes,
                ) {
                    new_hypotheses = working.merge_all(derived);
                    network_derived = new_hypotheses.iter().map(|h| h.category.clone()).collect();
                    boosts.network = boost;
                }
            }

            let category_confidence = self.category_confidence(&working, &run.signals);
            let strategy = self.planner.plan(&PlanningContext {
                pass,
                hypotheses: &working,
                previous: run.passes.last().map(|p| &p.strategy),
                network_derived: &network_derived,
                category_confidence: &category_confidence,
                temporally_favored: &favored,
                saturated: &run.confidence.saturated,
            });

            let outcome = self.run_pass(
                entity_id,
                pass,
                strategy,
                working,
                new_hypotheses,
                boosts,
                notes,
                &run,
                cancel,
            );
            match outcome {
                Ok((result, hypotheses, state)) => {
                    let new_signals = result
                        .signals
                        .iter()
                        .filter(|s| {
                            matches!(
                                s.decision,
                                Decision::Accept | Decision::WeakAccept | Decision::Reject
                            )
                        })
                        .count();
                    let previous = run.confidence.score;

                    run.retrieval_calls += result.retrieval_calls;
                    run.validation_calls += result.validation_calls;
                    run.hypotheses = hypotheses;
                    run.confidence = state;
                    run.signals.extend(result.signals.iter().cloned());
                    run.notes.extend(result.notes.iter().cloned());
                    run.trend.push(run.confidence.score);
                    run.passes.push(result);

                    let cost = self.config.cost.cost(run.retrieval_calls, run.validation_calls);
                    let elapsed_ms = elapsed_ms(started_at, self.clock.now());
                    let inputs = StopInputs {
                        pass,
                        max_passes,
                        previous_confidence: previous,
                        confidence: run.confidence.score,
                        new_signals,
                        budget_exhausted: options.budget.is_exhausted(elapsed_ms, cost),
                        stop_requested: cancel.is_stop_requested(),
                    };
                    if let Some(reason) = self.stopping.evaluate(&inputs) {
                        debug!(pass, reason = %reason, gain = inputs.gain(), "stopping");
                        match reason {
                            StopReason::BudgetExhausted => run.notes.push(ProcessingNote::new(
                                pass,
                                NoteKind::Budget,
                                format!(
                                    "budget exhausted after {elapsed_ms} ms and {cost} cost units"
                                ),
                            )),
                            StopReason::StopRequested => run.notes.push(ProcessingNote::new(
                                pass,
                                NoteKind::StopRequested,
                                "stop requested; finishing after this pass",
                            )),
                            _ => {}
                        }
                        stop_reason = reason;
                        break;
                    }
                }
                Err(DiscoveryError::Cancelled { pass }) => {
                    warn!(pass, "pass cancelled; discarding its results");
                    self.progress.publish(ProgressEvent::PassCancelled { pass });
                    run.notes.push(ProcessingNote::new(
                        pass,
                        NoteKind::Cancelled,
                        format!("pass {pass} cancelled; its results were discarded"),
                    ));
                    stop_reason = StopReason::Cancelled;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let finished_at = self.clock.now();
        let metadata = ReportMetadata {
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            passes: u32::try_from(run.passes.len()).unwrap_or(u32::MAX),
            retrieval_calls: run.retrieval_calls,
            validation_calls: run.validation_calls,
            cost: self.config.cost.cost(run.retrieval_calls, run.validation_calls),
            confidence_ceiling: self.config.confidence.ceiling,
        };
        let report = ReportBuilder::new(&self.aggregator, self.generator.catalog()).build(
            entity_id,
            &run.hypotheses,
            &run.signals,
            &run.confidence,
            run.trend,
            &run.notes,
            metadata,
        );

        let mut result = MultiPassResult {
            entity_id: entity_id.clone(),
            passes: run.passes,
            final_state: run.confidence,
            hypotheses: run.hypotheses.into_vec(),
            stop_reason,
            notes: run.notes,
            report,
        };

        if let Some(repository) = &self.repository {
            if let Err(source) = repository.save_result(&result) {
                let pass = u32::try_from(result.passes.len()).unwrap_or(u32::MAX);
                result
                    .notes
                    .push(persistence_note(pass, "save result", source));
            }
        }

        info!(
            entity = %entity_id,
            passes = result.passes.len(),
            confidence = result.final_state.score,
            band = %result.final_state.band,
            stop_reason = %result.stop_reason,
            "discovery finished"
        );
        self.progress.publish(ProgressEvent::RunFinished {
            entity_id: entity_id.clone(),
            stop_reason: result.stop_reason,
            confidence: result.final_state.score,
            band: result.final_state.band,
        });
        Ok(result)
    }

    /// Collects, governs and aggregates one pass without touching `run`.
    #[allow(clippy::too_many_arguments)]
    fn run_pass(
        &self,
        entity_id: &EntityId,
        pass: u32,
        strategy: PassStrategy,
        hypotheses: HypothesisSet,
        new_hypotheses: Vec<Hypothesis>,
        boosts: AppliedBoosts,
        mut notes: Vec<ProcessingNote>,
        run: &RunState,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<(PassResult, HypothesisSet, ConfidenceState)> {
        let requests = strategy.requests(entity_id, &hypotheses, self.config.evidence_per_depth);
        debug!(pass, focus = strategy.focus.len(), requests = requests.len(), "pass planned");
        self.progress.publish(ProgressEvent::PassStarted {
            pass,
            focus: strategy.focus.clone(),
            requests: requests.len(),
        });

        let collected = self.collector.collect(pass, requests, &hypotheses, &self.pool, cancel)?;
        notes.extend(collected.notes);

        let focus: Vec<Hypothesis> = strategy
            .focus
            .iter()
            .filter_map(|c| hypotheses.get(c).cloned())
            .collect();
        let governed = self.governance.run(
            PassInput {
                pass,
                focus: &focus,
                candidates: collected.candidates,
                prior_signals: &run.signals,
                ledger: LedgerState {
                    reject_streaks: run.confidence.reject_streaks.clone(),
                    saturated: run.confidence.saturated.clone(),
                },
            },
            &self.pool,
            cancel,
        )?;
        notes.extend(governed.notes);

        let tally = DecisionTally::from_signals(&governed.signals);
        let state = self.aggregator.advance(
            &run.confidence,
            &tally,
            boosts.total(),
            governed.ledger.reject_streaks,
            governed.ledger.saturated,
        );

        if let Some(provider) = &self.temporal {
            for signal in &governed.signals {
                if let Err(source) = provider.record_signal(entity_id, signal) {
                    notes.push(
                        persistence_note(pass, "append episode", source)
                            .for_category(&signal.category),
                    );
                }
            }
        }

        for signal in &governed.signals {
            self.progress.publish(ProgressEvent::SignalDecided {
                pass,
                category: signal.category.clone(),
                decision: signal.decision,
            });
        }
        for category in &governed.newly_saturated {
            self.progress.publish(ProgressEvent::CategorySaturated {
                pass,
                category: category.clone(),
            });
        }

        let delta = crate::confidence::round_score(state.score - run.confidence.score);
        self.progress.publish(ProgressEvent::PassCompleted {
            pass,
            confidence: state.score,
            delta,
            band: state.band,
            signals: governed.signals.len(),
        });
        info!(
            pass,
            confidence = state.score,
            delta,
            band = %state.band,
            signals = governed.signals.len(),
            "pass completed"
        );

        let result = PassResult {
            pass,
            strategy,
            signals: governed.signals,
            merged: governed.merged,
            confidence_before: run.confidence.score,
            confidence_after: state.score,
            delta,
            band: state.band,
            new_hypotheses,
            boosts,
            notes,
            retrieval_calls: collected.retrieval_calls,
            validation_calls: governed.validation_calls,
        };
        Ok((result, hypotheses, state))
    }

    fn fetch_profile(
        &self,
        entity_id: &EntityId,
        options: &DiscoveryOptions,
        notes: &mut Vec<ProcessingNote>,
    ) -> Option<EntityProfile> {
        let profile = match self.profiles.fetch_profile(entity_id) {
            Ok(profile) => profile,
            Err(err) => {
                warn!(
                    entity = %entity_id,
                    error = %err,
                    "profile unavailable; falling back to templates"
                );
                notes.push(ProcessingNote::new(
                    0,
                    NoteKind::EvidenceCollection,
                    format!("profile unavailable: {err}"),
                ));
                None
            }
        };
        profile.map(|mut p| {
            if let Some(vertical) = &options.vertical {
                p.vertical = normalize_vertical(vertical);
            }
            p
        })
    }

    fn temporal_context(
        &self,
        entity_id: &EntityId,
        hypotheses: &HypothesisSet,
        notes: &mut Vec<ProcessingNote>,
    ) -> Option<TemporalContext> {
        let provider = self.temporal.as_ref()?;
        let active: Vec<Hypothesis> = hypotheses.iter().cloned().collect();
        match provider.context(entity_id, &active, self.clock.now()) {
            Ok(ctx) => Some(ctx),
            Err(source) => {
                notes.push(persistence_note(1, "query episodes", source));
                None
            }
        }
    }

    fn network_context(
        &self,
        entity_id: &EntityId,
        hypotheses: &HypothesisSet,
        saturated: &BTreeSet<Category>,
        pass: u32,
        notes: &mut Vec<ProcessingNote>,
    ) -> Option<(Vec<Hypothesis>, f64)> {
        let provider = self.network.as_ref()?;
        match provider.context(entity_id, hypotheses, saturated, pass) {
            Ok(ctx) => Some((ctx.derived, ctx.boost)),
            Err(source) => {
                notes.push(persistence_note(pass, "read relationships", source));
                None
            }
        }
    }

    fn category_confidence(
        &self,
        hypotheses: &HypothesisSet,
        signals: &[Signal],
    ) -> BTreeMap<Category, f64> {
        let mut tallies: BTreeMap<&Category, DecisionTally> = BTreeMap::new();
        for signal in signals.iter().filter(|s| s.counts_toward_confidence()) {
            tallies
                .entry(&signal.category)
                .or_default()
                .record(&signal.category, signal.decision);
        }
        let empty = DecisionTally::default();
        hypotheses
            .iter()
            .map(|h| {
                let tally = tallies.get(&h.category).unwrap_or(&empty);
                (h.category.clone(), self.aggregator.category_confidence(h.prior, tally))
            })
            .collect()
    }
}

fn persistence_note(pass: u32, operation: &str, source: CollaboratorError) -> ProcessingNote {
    let err = DiscoveryError::Persistence {
        operation: operation.to_string(),
        source,
    };
    warn!(pass, error = %err, "persistence failed; continuing");
    ProcessingNote::new(pass, NoteKind::Persistence, err.to_string())
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
