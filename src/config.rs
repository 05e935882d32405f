//! Run configuration and per-run options.
//!
//! `DiscoveryConfig` groups every tunable into sections that can be loaded
//! from TOML; missing sections and keys take their defaults. Validation runs
//! before the first pass so that a bad value never reaches the loop.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceConfig;
use crate::error::ConfigurationError;
use crate::governance::GovernanceConfig;
use crate::network::NetworkConfig;
use crate::runtime::RuntimeConfig;
use crate::stopping::{Budget, StoppingConfig};
use crate::temporal::{TemporalConfig, MAX_HORIZON_DAYS};

/// Cost units charged per collaborator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub retrieval_call: f64,
    pub validation_call: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            retrieval_call: 1.0,
            validation_call: 2.0,
        }
    }
}

impl CostConfig {
    /// Cost of the given call counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, retrieval_calls: usize, validation_calls: usize) -> f64 {
        self.retrieval_call * retrieval_calls as f64
            + self.validation_call * validation_calls as f64
    }
}

/// Every tunable of a discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub confidence: ConfidenceConfig,
    pub governance: GovernanceConfig,
    pub temporal: TemporalConfig,
    pub network: NetworkConfig,
    pub runtime: RuntimeConfig,
    pub stopping: StoppingConfig,
    pub cost: CostConfig,
    /// Evidence items requested per unit of strategy depth.
    pub evidence_per_depth: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidenceConfig::default(),
            governance: GovernanceConfig::default(),
            temporal: TemporalConfig::default(),
            network: NetworkConfig::default(),
            runtime: RuntimeConfig::default(),
            stopping: StoppingConfig::default(),
            cost: CostConfig::default(),
            evidence_per_depth: 3,
        }
    }
}

fn unit(field: &str, value: f64) -> Result<(), ConfigurationError> {
    in_range(field, value, 0.0, 1.0)
}

fn in_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigurationError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigurationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn non_zero(field: &str, value: u64) -> Result<(), ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::Zero {
            field: field.to_string(),
        });
    }
    Ok(())
}

impl DiscoveryConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Parse` for malformed TOML, or the first
    /// validation failure.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigurationError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Io` if the file cannot be read, otherwise
    /// as [`DiscoveryConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Parse` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|e| ConfigurationError::Parse {
            message: e.to_string(),
        })
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range or zero value found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let c = &self.confidence;
        unit("confidence.baseline", c.baseline)?;
        unit("confidence.ceiling", c.ceiling)?;
        in_range("confidence.baseline", c.baseline, 0.0, c.ceiling)?;
        in_range("confidence.accept_weight", c.accept_weight, 0.0, 1.0)?;
        in_range("confidence.weak_accept_weight", c.weak_accept_weight, 0.0, c.accept_weight)?;
        unit("confidence.informed_threshold", c.informed_threshold)?;
        in_range(
            "confidence.confident_threshold",
            c.confident_threshold,
            c.informed_threshold,
            1.0,
        )?;
        in_range(
            "confidence.actionable_threshold",
            c.actionable_threshold,
            c.confident_threshold,
            1.0,
        )?;

        let g = &self.governance;
        unit("governance.min_credibility", g.min_credibility)?;
        unit("governance.dedup_similarity", g.dedup_similarity)?;
        unit("governance.fallback_accept_credibility", g.fallback_accept_credibility)?;
        non_zero("governance.saturation_rejects", u64::from(g.saturation_rejects))?;

        let t = &self.temporal;
        if t.horizon_days <= 0 {
            return Err(ConfigurationError::Zero {
                field: "temporal.horizon_days".to_string(),
            });
        }
        if t.horizon_days > MAX_HORIZON_DAYS {
            #[allow(clippy::cast_precision_loss)]
            let (value, max) = (t.horizon_days as f64, MAX_HORIZON_DAYS as f64);
            return Err(ConfigurationError::OutOfRange {
                field: "temporal.horizon_days".to_string(),
                value,
                min: 1.0,
                max,
            });
        }
        if t.recent_days < 1 || t.recent_days > t.horizon_days {
            return Err(ConfigurationError::OutOfRange {
                field: "temporal.recent_days".to_string(),
                value: f64::from(i32::try_from(t.recent_days).unwrap_or(i32::MAX)),
                min: 1.0,
                max: f64::from(i32::try_from(t.horizon_days).unwrap_or(i32::MAX)),
            });
        }
        unit("temporal.fit_floor", t.fit_floor)?;
        in_range("temporal.fit_ceiling", t.fit_ceiling, t.fit_floor, 1.0)?;
        unit("temporal.favored_threshold", t.favored_threshold)?;
        unit("temporal.boost_few", t.boost_few)?;
        in_range("temporal.boost_many", t.boost_many, t.boost_few, 1.0)?;
        unit("temporal.persistence_threshold", t.persistence_threshold)?;

        let n = &self.network;
        unit("network.network_prior", n.network_prior)?;
        unit("network.boost_per_match", n.boost_per_match)?;
        unit("network.boost_cap", n.boost_cap)?;

        let r = &self.runtime;
        non_zero("runtime.max_in_flight", r.max_in_flight as u64)?;
        non_zero("runtime.call_timeout_ms", r.call_timeout_ms)?;
        non_zero("runtime.retry.max_attempts", u64::from(r.retry.max_attempts))?;
        in_range("runtime.retry.multiplier", r.retry.multiplier, 1.0, 16.0)?;

        let s = &self.stopping;
        unit("stopping.min_gain", s.min_gain)?;
        unit("stopping.plateau_confidence", s.plateau_confidence)?;
        unit("stopping.plateau_gain", s.plateau_gain)?;

        in_range("cost.retrieval_call", self.cost.retrieval_call, 0.0, f64::MAX)?;
        in_range("cost.validation_call", self.cost.validation_call, 0.0, f64::MAX)?;
        non_zero("evidence_per_depth", self.evidence_per_depth as u64)?;
        Ok(())
    }
}

/// Per-run inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Signed so that zero and negative requests can be rejected.
    pub max_passes: i64,
    pub include_temporal: bool,
    pub include_network: bool,
    #[serde(default)]
    pub budget: Budget,
    /// Overrides the profile's vertical when choosing templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_passes: 4,
            include_temporal: true,
            include_network: true,
            budget: Budget::default(),
            vertical: None,
        }
    }
}

impl DiscoveryOptions {
    #[must_use]
    pub fn with_max_passes(mut self, max_passes: i64) -> Self {
        self.max_passes = max_passes;
        self
    }

    #[must_use]
    pub fn with_temporal(mut self, enabled: bool) -> Self {
        self.include_temporal = enabled;
        self
    }

    #[must_use]
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.include_network = enabled;
        self
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_vertical(mut self, vertical: impl Into<String>) -> Self {
        self.vertical = Some(vertical.into());
        self
    }

    /// Validates the options and returns the pass limit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMaxPasses` for a limit below one, or the budget's
    /// validation error.
    pub fn validate(&self) -> Result<u32, ConfigurationError> {
        let max_passes = u32::try_from(self.max_passes)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or(ConfigurationError::InvalidMaxPasses { value: self.max_passes })?;
        self.budget.validate()?;
        Ok(max_passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DiscoveryConfig::default().validate().is_ok());
        assert_eq!(DiscoveryOptions::default().validate(), Ok(4));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            evidence_per_depth = 2

            [confidence]
            ceiling = 0.95

            [runtime.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.evidence_per_depth, 2);
        assert_eq!(config.confidence.ceiling, 0.95);
        assert_eq!(config.confidence.baseline, 0.50);
        assert_eq!(config.runtime.retry.max_attempts, 5);
        assert_eq!(config.runtime.max_in_flight, 8);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err =
            DiscoveryConfig::from_toml_str("[governance]\nmin_credibility = 1.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OutOfRange { ref field, .. }
                if field == "governance.min_credibility"
        ));

        let err = DiscoveryConfig::from_toml_str("[runtime]\nmax_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::Zero { .. }));
    }

    #[test]
    fn oversized_horizon_is_rejected() {
        let mut config = DiscoveryConfig::default();
        config.temporal.horizon_days = 1_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OutOfRange { ref field, .. } if field == "temporal.horizon_days"
        ));

        config.temporal.horizon_days = MAX_HORIZON_DAYS;
        assert!(config.validate().is_ok());

        config.temporal.recent_days = MAX_HORIZON_DAYS + 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OutOfRange { ref field, .. } if field == "temporal.recent_days"
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = DiscoveryConfig::from_toml_str("[confidence\nceiling = ").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse { .. }));
    }

    #[test]
    fn config_survives_toml() {
        let config = DiscoveryConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(DiscoveryConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DiscoveryConfig::from_file("/nonexistent/precog.toml").unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }

    #[test]
    fn max_passes_must_be_positive() {
        assert_eq!(
            DiscoveryOptions::default().with_max_passes(0).validate(),
            Err(ConfigurationError::InvalidMaxPasses { value: 0 })
        );
        assert_eq!(
            DiscoveryOptions::default().with_max_passes(-2).validate(),
            Err(ConfigurationError::InvalidMaxPasses { value: -2 })
        );
        let bad_budget =
            DiscoveryOptions::default().with_budget(Budget::default().with_max_cost(0.0));
        assert!(matches!(bad_budget.validate(), Err(ConfigurationError::NonPositiveBudget { .. })));
    }

    #[test]
    fn cost_model_charges_per_call() {
        assert_eq!(CostConfig::default().cost(3, 2), 7.0);
    }
}
