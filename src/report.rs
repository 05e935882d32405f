//! Opportunity report derived from a finished run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CapabilityCatalog, Category, ValueRange};
use crate::confidence::{ConfidenceAggregator, ConfidenceBand, ConfidenceState, DecisionTally};
use crate::entity::EntityId;
use crate::hypothesis::HypothesisSet;
use crate::notes::ProcessingNote;
use crate::signal::Signal;

/// Next step suggested for an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Keep watching; nothing to act on yet.
    Monitor,
    /// Gather more evidence before reaching out.
    Research,
    /// Open a conversation with the entity.
    Engage,
    /// Prepare a proposal.
    Pursue,
}

impl RecommendedAction {
    #[must_use]
    pub const fn for_band(band: ConfidenceBand) -> Self {
        match band {
            ConfidenceBand::Exploratory => Self::Monitor,
            ConfidenceBand::Informed => Self::Research,
            ConfidenceBand::Confident => Self::Engage,
            ConfidenceBand::Actionable => Self::Pursue,
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitor => write!(f, "monitor"),
            Self::Research => write!(f, "research"),
            Self::Engage => write!(f, "engage"),
            Self::Pursue => write!(f, "pursue"),
        }
    }
}

/// Share of the catalog value range expected at a band.
#[must_use]
pub const fn value_factor(band: ConfidenceBand) -> f64 {
    match band {
        ConfidenceBand::Exploratory => 0.25,
        ConfidenceBand::Informed => 0.5,
        ConfidenceBand::Confident => 0.75,
        ConfidenceBand::Actionable => 1.0,
    }
}

/// One category of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityEntry {
    pub category: Category,
    pub confidence: f64,
    pub band: ConfidenceBand,
    pub matched_capability: String,
    pub estimated_value_range: ValueRange,
    pub recommended_action: RecommendedAction,
    pub accepts: u32,
    pub weak_accepts: u32,
    /// Closed by repeated rejects during the run.
    pub saturated: bool,
}

/// Cost and timing of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub passes: u32,
    pub retrieval_calls: usize,
    pub validation_calls: usize,
    /// Cost units spent.
    pub cost: f64,
    /// Upper bound the confidence score was clamped to.
    pub confidence_ceiling: f64,
}

/// Final, read-only view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityReport {
    pub entity_id: EntityId,
    pub confidence: f64,
    pub band: ConfidenceBand,
    pub recommended_action: RecommendedAction,
    /// Entries ordered by confidence, highest first.
    pub entries: Vec<OpportunityEntry>,
    /// Baseline followed by the confidence after every completed pass.
    pub confidence_trend: Vec<f64>,
    pub metadata: ReportMetadata,
    pub notes: Vec<String>,
}

impl OpportunityReport {
    /// Entries whose own band is at least `band`.
    pub fn entries_at_least(
        &self,
        band: ConfidenceBand,
    ) -> impl Iterator<Item = &OpportunityEntry> {
        self.entries.iter().filter(move |e| e.band >= band)
    }

    /// Looks up the entry for a category.
    #[must_use]
    pub fn entry(&self, category: &Category) -> Option<&OpportunityEntry> {
        self.entries.iter().find(|e| &e.category == category)
    }
}

/// Builds reports from run state.
pub struct ReportBuilder<'a> {
    aggregator: &'a ConfidenceAggregator,
    catalog: &'a CapabilityCatalog,
}

impl<'a> ReportBuilder<'a> {
    #[must_use]
    pub fn new(aggregator: &'a ConfidenceAggregator, catalog: &'a CapabilityCatalog) -> Self {
        Self { aggregator, catalog }
    }

    /// Derives the report. The output depends only on the arguments.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        entity_id: &EntityId,
        hypotheses: &HypothesisSet,
        signals: &[Signal],
        state: &ConfidenceState,
        confidence_trend: Vec<f64>,
        notes: &[ProcessingNote],
        metadata: ReportMetadata,
    ) -> OpportunityReport {
        let mut per_category: BTreeMap<&Category, DecisionTally> = BTreeMap::new();
        for signal in signals.iter().filter(|s| s.counts_toward_confidence()) {
            per_category
                .entry(&signal.category)
                .or_default()
                .record(&signal.category, signal.decision);
        }

        let empty = DecisionTally::default();
        let mut entries: Vec<OpportunityEntry> = hypotheses
            .iter()
            .map(|h| {
                let tally = per_category.get(&h.category).unwrap_or(&empty);
                let confidence = self.aggregator.category_confidence(h.prior, tally);
                let saturated = state.is_saturated(&h.category);
                // The run-level tally decides whether ACTIONABLE is reachable.
                let band = if saturated {
                    ConfidenceBand::Exploratory
                } else {
                    self.aggregator.band(confidence, &state.tally)
                };
                let estimated_value_range = self.catalog.get(&h.category).map_or_else(
                    || ValueRange::new(0.0, 0.0, "GBP"),
                    |entry| entry.value_range.scaled(value_factor(band)),
                );
                OpportunityEntry {
                    category: h.category.clone(),
                    confidence,
                    band,
                    matched_capability: h.matched_capability.clone(),
                    estimated_value_range,
                    recommended_action: RecommendedAction::for_band(band),
                    accepts: tally.accepts,
                    weak_accepts: tally.weak_accepts,
                    saturated,
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.category.cmp(&b.category))
        });

        OpportunityReport {
            entity_id: entity_id.clone(),
            confidence: state.score,
            band: state.band,
            recommended_action: RecommendedAction::for_band(state.band),
            entries,
            confidence_trend,
            metadata,
            notes: notes.iter().map(ToString::to_string).collect(),
        }
    }
}
