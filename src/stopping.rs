//! Stopping conditions, evaluated once after every completed pass.
//!
//! Conditions are checked in a fixed order and the first that holds wins:
//! saturation, exhaustion, plateau, max passes, budget, stop request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::confidence::round_score;
use crate::error::ConfigurationError;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Confidence gain over the last pass fell below the minimum.
    Saturation,
    /// The latest pass produced no ACCEPT, WEAK_ACCEPT or REJECT signal.
    Exhaustion,
    /// Confidence is high and barely moving.
    Plateau,
    MaxPasses,
    BudgetExhausted,
    StopRequested,
    /// The run was cancelled mid-pass; that pass was discarded.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Saturation => "saturation",
            Self::Exhaustion => "exhaustion",
            Self::Plateau => "plateau",
            Self::MaxPasses => "max_passes",
            Self::BudgetExhausted => "budget_exhausted",
            Self::StopRequested => "stop_requested",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Thresholds of the stopping rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingConfig {
    /// Stop when the gain over the last pass is below this (pass 2 onwards).
    pub min_gain: f64,
    /// Plateau: confidence strictly above this with a gain below
    /// `plateau_gain`.
    pub plateau_confidence: f64,
    pub plateau_gain: f64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            min_gain: 0.01,
            plateau_confidence: 0.85,
            plateau_gain: 0.02,
        }
    }
}

/// Optional wall-clock and cost limits for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

impl Budget {
    #[must_use]
    pub fn with_max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost = Some(cost);
        self
    }

    /// Rejects limits that are zero or negative.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NonPositiveBudget`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_duration_ms == Some(0) {
            return Err(ConfigurationError::NonPositiveBudget {
                field: "max_duration_ms".to_string(),
                value: 0.0,
            });
        }
        if let Some(cost) = self.max_cost {
            if cost.is_nan() || cost <= 0.0 {
                return Err(ConfigurationError::NonPositiveBudget {
                    field: "max_cost".to_string(),
                    value: cost,
                });
            }
        }
        Ok(())
    }

    /// Returns true once either limit has been reached.
    #[must_use]
    pub fn is_exhausted(&self, elapsed_ms: u64, cost: f64) -> bool {
        self.max_duration_ms.is_some_and(|max| elapsed_ms >= max)
            || self.max_cost.is_some_and(|max| cost >= max)
    }
}

/// Facts about the pass that just completed.
#[derive(Debug, Clone, PartialEq)]
pub struct StopInputs {
    pub pass: u32,
    pub max_passes: u32,
    /// Confidence before the pass.
    pub previous_confidence: f64,
    /// Confidence after the pass.
    pub confidence: f64,
    /// ACCEPT, WEAK_ACCEPT and REJECT signals produced by the pass.
    pub new_signals: usize,
    pub budget_exhausted: bool,
    pub stop_requested: bool,
}

impl StopInputs {
    /// Confidence gained by the pass, rounded like scores.
    #[must_use]
    pub fn gain(&self) -> f64 {
        round_score(self.confidence - self.previous_confidence)
    }
}

/// Decides whether the run continues.
#[derive(Debug, Clone, Default)]
pub struct StoppingEvaluator {
    config: StoppingConfig,
}

impl StoppingEvaluator {
    #[must_use]
    pub fn new(config: StoppingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StoppingConfig {
        &self.config
    }

    /// Returns the reason to stop, or `None` to run another pass.
    #[must_use]
    pub fn evaluate(&self, inputs: &StopInputs) -> Option<StopReason> {
        let gain = inputs.gain();
        if inputs.pass >= 2 && gain < self.config.min_gain {
            return Some(StopReason::Saturation);
        }
        if inputs.new_signals == 0 {
            return Some(StopReason::Exhaustion);
        }
        if inputs.confidence > self.config.plateau_confidence && gain < self.config.plateau_gain {
            return Some(StopReason::Plateau);
        }
        if inputs.pass >= inputs.max_passes {
            return Some(StopReason::MaxPasses);
        }
        if inputs.budget_exhausted {
            return Some(StopReason::BudgetExhausted);
        }
        if inputs.stop_requested {
            return Some(StopReason::StopRequested);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pass: u32, previous: f64, confidence: f64) -> StopInputs {
        StopInputs {
            pass,
            max_passes: 10,
            previous_confidence: previous,
            confidence,
            new_signals: 3,
            budget_exhausted: false,
            stop_requested: false,
        }
    }

    #[test]
    fn small_gain_stops_from_pass_two() {
        let eval = StoppingEvaluator::default();
        assert_eq!(eval.evaluate(&inputs(3, 0.760, 0.768)), Some(StopReason::Saturation));
        // Pass 1 is measured against the baseline and never saturates.
        assert_eq!(eval.evaluate(&inputs(1, 0.50, 0.505)), None);
    }

    #[test]
    fn gain_at_threshold_continues() {
        let eval = StoppingEvaluator::default();
        assert_eq!(eval.evaluate(&inputs(2, 0.58, 0.59)), None);
    }

    #[test]
    fn no_new_signals_is_exhaustion() {
        let eval = StoppingEvaluator::default();
        let mut i = inputs(1, 0.5, 0.5);
        i.new_signals = 0;
        assert_eq!(eval.evaluate(&i), Some(StopReason::Exhaustion));
    }

    #[test]
    fn high_and_flat_is_plateau() {
        let eval = StoppingEvaluator::default();
        assert_eq!(eval.evaluate(&inputs(4, 0.855, 0.87)), Some(StopReason::Plateau));
        assert_eq!(eval.evaluate(&inputs(4, 0.84, 0.87)), None);
    }

    #[test]
    fn max_passes_then_budget_then_request() {
        let eval = StoppingEvaluator::default();
        let mut i = inputs(4, 0.5, 0.6);
        i.max_passes = 4;
        i.budget_exhausted = true;
        assert_eq!(eval.evaluate(&i), Some(StopReason::MaxPasses));
        i.max_passes = 5;
        assert_eq!(eval.evaluate(&i), Some(StopReason::BudgetExhausted));
        i.budget_exhausted = false;
        i.stop_requested = true;
        assert_eq!(eval.evaluate(&i), Some(StopReason::StopRequested));
    }

    #[test]
    fn budget_validation_and_exhaustion() {
        assert!(Budget::default().validate().is_ok());
        assert!(Budget::default().with_max_cost(0.0).validate().is_err());
        assert!(Budget::default().with_max_cost(-3.0).validate().is_err());
        assert!(Budget::default().with_max_duration_ms(0).validate().is_err());

        let budget = Budget::default().with_max_cost(10.0);
        assert!(!budget.is_exhausted(1_000_000, 9.5));
        assert!(budget.is_exhausted(0, 10.0));
    }
}
