//! Confidence aggregation with fixed arithmetic.
//!
//! Confidence is a pure function of how many ACCEPT and WEAK_ACCEPT signals
//! have been counted plus any context boosts:
//!
//! ```text
//! confidence = clamp(baseline + 0.06 * accepts + 0.02 * weak_accepts + boosts, 0, ceiling)
//! ```
//!
//! Because only counts enter the formula, the result does not depend on the
//! order signals were validated in. Scores are rounded to six decimals so
//! pass-to-pass gains compare exactly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::signal::{Decision, Signal};

/// Rounds a score to six decimal places.
#[must_use]
pub fn round_score(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Named range of the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceBand {
    Exploratory,
    Informed,
    Confident,
    Actionable,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exploratory => write!(f, "EXPLORATORY"),
            Self::Informed => write!(f, "INFORMED"),
            Self::Confident => write!(f, "CONFIDENT"),
            Self::Actionable => write!(f, "ACTIONABLE"),
        }
    }
}

/// Weights and thresholds of the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Starting confidence before any signal.
    pub baseline: f64,
    pub accept_weight: f64,
    pub weak_accept_weight: f64,
    /// Upper clamp bound, at most 1.0.
    pub ceiling: f64,
    pub informed_threshold: f64,
    pub confident_threshold: f64,
    pub actionable_threshold: f64,
    /// ACTIONABLE gate: minimum counted ACCEPT signals.
    pub actionable_min_accepts: u32,
    /// ACTIONABLE gate: minimum distinct categories with an ACCEPT.
    pub actionable_min_categories: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            baseline: 0.50,
            accept_weight: 0.06,
            weak_accept_weight: 0.02,
            ceiling: 0.90,
            informed_threshold: 0.30,
            confident_threshold: 0.60,
            actionable_threshold: 0.80,
            actionable_min_accepts: 2,
            actionable_min_categories: 2,
        }
    }
}

/// Counted decisions of a set of signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTally {
    pub accepts: u32,
    pub weak_accepts: u32,
    pub accept_categories: BTreeSet<Category>,
}

impl DecisionTally {
    /// Tallies (category, decision) pairs. Only ACCEPT and WEAK_ACCEPT count.
    pub fn from_decisions<'a>(
        decisions: impl IntoIterator<Item = (&'a Category, Decision)>,
    ) -> Self {
        let mut tally = Self::default();
        for (category, decision) in decisions {
            tally.record(category, decision);
        }
        tally
    }

    /// Tallies the counted signals among `signals`.
    pub fn from_signals<'a>(signals: impl IntoIterator<Item = &'a Signal>) -> Self {
        Self::from_decisions(
            signals
                .into_iter()
                .filter(|s| s.counts_toward_confidence())
                .map(|s| (&s.category, s.decision)),
        )
    }

    /// Records one decision.
    pub fn record(&mut self, category: &Category, decision: Decision) {
        match decision {
            Decision::Accept => {
                self.accepts += 1;
                self.accept_categories.insert(category.clone());
            }
            Decision::WeakAccept => self.weak_accepts += 1,
            Decision::Reject | Decision::NoProgress | Decision::Saturated => {}
        }
    }

    /// Adds another tally into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.accepts += other.accepts;
        self.weak_accepts += other.weak_accepts;
        self.accept_categories
            .extend(other.accept_categories.iter().cloned());
    }
}

/// Running confidence for one discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceState {
    /// Current score in [0, 1].
    pub score: f64,
    pub band: ConfidenceBand,

    /// Counted decisions over all completed passes.
    pub tally: DecisionTally,

    /// Sum of context boosts applied so far.
    pub boost_total: f64,

    /// Consecutive REJECT counters per category.
    pub reject_streaks: BTreeMap<Category, u32>,

    /// Categories closed for the rest of the run.
    pub saturated: BTreeSet<Category>,
}

impl ConfidenceState {
    /// Returns true if the category has been saturated.
    #[must_use]
    pub fn is_saturated(&self, category: &Category) -> bool {
        self.saturated.contains(category)
    }
}

/// Pure confidence arithmetic.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceAggregator {
    config: ConfidenceConfig,
}

impl ConfidenceAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// The aggregator's configuration.
    #[must_use]
    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// State before any pass has run.
    #[must_use]
    pub fn initial_state(&self) -> ConfidenceState {
        let score = self.score(&DecisionTally::default(), 0.0);
        ConfidenceState {
            score,
            band: self.band(score, &DecisionTally::default()),
            tally: DecisionTally::default(),
            boost_total: 0.0,
            reject_streaks: BTreeMap::new(),
            saturated: BTreeSet::new(),
        }
    }

    /// Computes the clamped score for a tally plus boosts.
    #[must_use]
    pub fn score(&self, tally: &DecisionTally, boosts: f64) -> f64 {
        let raw = self.config.baseline
            + self.config.accept_weight * f64::from(tally.accepts)
            + self.config.weak_accept_weight * f64::from(tally.weak_accepts)
            + boosts;
        round_score(raw.clamp(0.0, self.config.ceiling.min(1.0)))
    }

    /// Maps a score to its band, applying the ACTIONABLE gate.
    #[must_use]
    pub fn band(&self, score: f64, tally: &DecisionTally) -> ConfidenceBand {
        if score >= self.config.actionable_threshold {
            if self.actionable_gate_met(tally) {
                ConfidenceBand::Actionable
            } else {
                ConfidenceBand::Confident
            }
        } else if score >= self.config.confident_threshold {
            ConfidenceBand::Confident
        } else if score >= self.config.informed_threshold {
            ConfidenceBand::Informed
        } else {
            ConfidenceBand::Exploratory
        }
    }

    /// Returns true if enough ACCEPT signals span enough categories.
    #[must_use]
    pub fn actionable_gate_met(&self, tally: &DecisionTally) -> bool {
        tally.accepts >= self.config.actionable_min_accepts
            && tally.accept_categories.len() >= self.config.actionable_min_categories
    }

    /// Aggregates decisions from scratch.
    #[must_use]
    pub fn aggregate<'a>(
        &self,
        decisions: impl IntoIterator<Item = (&'a Category, Decision)>,
        boosts: f64,
    ) -> (f64, ConfidenceBand) {
        let tally = DecisionTally::from_decisions(decisions);
        let score = self.score(&tally, boosts);
        (score, self.band(score, &tally))
    }

    /// Folds one pass into the running state, returning the new state.
    ///
    /// Ledger fields (streaks, saturated set) are taken from the caller since
    /// they are owned by the governance loop.
    #[must_use]
    pub fn advance(
        &self,
        previous: &ConfidenceState,
        pass_tally: &DecisionTally,
        boost: f64,
        reject_streaks: BTreeMap<Category, u32>,
        saturated: BTreeSet<Category>,
    ) -> ConfidenceState {
        let mut tally = previous.tally.clone();
        tally.absorb(pass_tally);
        let boost_total = round_score(previous.boost_total + boost);
        let score = self.score(&tally, boost_total);
        ConfidenceState {
            score,
            band: self.band(score, &tally),
            tally,
            boost_total,
            reject_streaks,
            saturated,
        }
    }

    /// Confidence of a single category: its prior plus its own signals.
    #[must_use]
    pub fn category_confidence(&self, prior: f64, tally: &DecisionTally) -> f64 {
        let raw = prior
            + self.config.accept_weight * f64::from(tally.accepts)
            + self.config.weak_accept_weight * f64::from(tally.weak_accepts);
        round_score(raw.clamp(0.0, self.config.ceiling.min(1.0)))
    }
}
