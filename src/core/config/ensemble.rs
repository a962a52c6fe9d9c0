//! Ensemble aggregation configuration types.
//!
//! This module contains the voting policy, the severity weights, the optional
//! co-occurrence penalty and the severity scale and tier cutoffs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::estimators::EstimatorSuiteConfig;
use super::validation::{
    validate_bounded_usize, validate_non_negative, validate_weights_sum, WEIGHT_SUM_TOLERANCE,
};
use crate::core::ensemble::RiskTier;
use crate::core::errors::{Result, RiskError};
use crate::estimators::EstimatorKind;

/// Ensemble aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnsembleConfig {
    /// Vote aggregation over binary flags
    #[serde(default)]
    pub voting: VotingConfig,

    /// Weighted severity aggregation over normalized scores
    #[serde(default)]
    pub severity: SeverityConfig,
}

impl EnsembleConfig {
    /// Validate both aggregation policies against the estimator suite
    pub fn validate(&self, estimators: &EstimatorSuiteConfig) -> Result<()> {
        self.voting.validate(estimators)?;
        self.severity.validate(estimators)
    }
}

/// How an excluded voter affects the vote denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailedVoterPolicy {
    /// Fewer voters: the threshold is rescaled to the voters that contributed
    #[default]
    ShrinkDenominator,
    /// Fixed voters: an excluded voter counts as "not flagged"
    CountAsNotFlagged,
}

/// Vote aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Estimators whose flags are counted as votes
    #[serde(default = "VotingConfig::default_voters")]
    pub voters: Vec<EstimatorKind>,

    /// Votes needed for the High tier
    #[serde(default = "VotingConfig::default_threshold")]
    pub threshold: usize,

    /// Votes needed for the Critical tier; defaults to every voter agreeing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_threshold: Option<usize>,

    /// Denominator policy when a voter is excluded
    #[serde(default)]
    pub failed_voters: FailedVoterPolicy,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            voters: Self::default_voters(),
            threshold: Self::default_threshold(),
            critical_threshold: None,
            failed_voters: FailedVoterPolicy::default(),
        }
    }
}

impl VotingConfig {
    fn default_voters() -> Vec<EstimatorKind> {
        vec![
            EstimatorKind::Partition,
            EstimatorKind::Density,
            EstimatorKind::Isolation,
        ]
    }

    const fn default_threshold() -> usize {
        2
    }

    /// Validate voting configuration
    pub fn validate(&self, estimators: &EstimatorSuiteConfig) -> Result<()> {
        if self.voters.is_empty() {
            return Err(RiskError::config_field(
                "at least one voter is required",
                "ensemble.voting.voters",
            ));
        }

        for (index, voter) in self.voters.iter().enumerate() {
            if self.voters[..index].contains(voter) {
                return Err(RiskError::config_field(
                    format!("voter '{voter}' is listed twice"),
                    "ensemble.voting.voters",
                ));
            }
            if !estimators.is_enabled(*voter) {
                return Err(RiskError::config_field(
                    format!("voter '{voter}' is not enabled"),
                    "ensemble.voting.voters",
                ));
            }
        }

        validate_bounded_usize(
            self.threshold,
            1,
            self.voters.len(),
            "ensemble.voting.threshold",
        )?;

        if let Some(critical) = self.critical_threshold {
            validate_bounded_usize(
                critical,
                self.threshold,
                self.voters.len(),
                "ensemble.voting.critical_threshold",
            )?;
        }

        Ok(())
    }
}

/// Multiplicative severity penalty applied when an indicator estimator flags a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityPenalty {
    /// Estimator whose flag triggers the penalty
    pub indicator: EstimatorKind,

    /// Multiplier applied to the unit severity before clamping
    pub factor: f64,
}

impl Default for SeverityPenalty {
    fn default() -> Self {
        Self {
            indicator: EstimatorKind::Density,
            factor: 1.2,
        }
    }
}

/// Bounds of the reported severity index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityScale {
    /// Severity of a user with no risk signal
    pub lower: f64,
    /// Severity of a user at maximum risk
    pub upper: f64,
}

impl Default for SeverityScale {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
        }
    }
}

impl SeverityScale {
    /// Map a unit severity in [0, 1] onto the configured scale
    pub fn rescale(&self, unit: f64) -> f64 {
        self.lower + unit.clamp(0.0, 1.0) * (self.upper - self.lower)
    }
}

/// Unit-severity cutoffs for the severity tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierCutoffs {
    /// Lowest unit severity classified as Moderate
    pub moderate: f64,
    /// Lowest unit severity classified as High
    pub high: f64,
    /// Lowest unit severity classified as Critical
    pub critical: f64,
}

impl Default for TierCutoffs {
    fn default() -> Self {
        Self {
            moderate: 0.3,
            high: 0.5,
            critical: 0.7,
        }
    }
}

impl TierCutoffs {
    /// Classify a unit severity
    pub fn tier_for(&self, unit: f64) -> RiskTier {
        if unit >= self.critical {
            RiskTier::Critical
        } else if unit >= self.high {
            RiskTier::High
        } else if unit >= self.moderate {
            RiskTier::Moderate
        } else {
            RiskTier::Low
        }
    }

    fn validate(&self) -> Result<()> {
        let ordered = 0.0 < self.moderate
            && self.moderate < self.high
            && self.high < self.critical
            && self.critical < 1.0;
        if !ordered {
            return Err(RiskError::config_field(
                format!(
                    "tier cutoffs must satisfy 0 < moderate < high < critical < 1, got {}/{}/{}",
                    self.moderate, self.high, self.critical
                ),
                "ensemble.severity.tiers",
            ));
        }
        Ok(())
    }
}

/// Weighted severity aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityConfig {
    /// Weight per estimator; must sum to 1.0
    #[serde(default = "SeverityConfig::default_weights")]
    pub weights: IndexMap<EstimatorKind, f64>,

    /// Optional co-occurrence penalty
    #[serde(default = "SeverityConfig::default_penalty")]
    pub penalty: Option<SeverityPenalty>,

    /// Reported severity bounds
    #[serde(default)]
    pub scale: SeverityScale,

    /// Severity tier cutoffs on the unit scale
    #[serde(default)]
    pub tiers: TierCutoffs,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            weights: Self::default_weights(),
            penalty: Self::default_penalty(),
            scale: SeverityScale::default(),
            tiers: TierCutoffs::default(),
        }
    }
}

impl SeverityConfig {
    fn default_weights() -> IndexMap<EstimatorKind, f64> {
        IndexMap::from([(EstimatorKind::Isolation, 0.6), (EstimatorKind::Partition, 0.4)])
    }

    #[allow(clippy::unnecessary_wraps)]
    fn default_penalty() -> Option<SeverityPenalty> {
        Some(SeverityPenalty::default())
    }

    /// Validate severity configuration
    pub fn validate(&self, estimators: &EstimatorSuiteConfig) -> Result<()> {
        if self.weights.is_empty() {
            return Err(RiskError::config_field(
                "at least one severity weight is required",
                "ensemble.severity.weights",
            ));
        }

        for (kind, weight) in &self.weights {
            validate_non_negative(*weight, &format!("ensemble.severity.weights.{kind}"))?;
            if !estimators.is_enabled(*kind) {
                return Err(RiskError::config_field(
                    format!("weighted estimator '{kind}' is not enabled"),
                    "ensemble.severity.weights",
                ));
            }
        }

        let weights: Vec<f64> = self.weights.values().copied().collect();
        validate_weights_sum(&weights, WEIGHT_SUM_TOLERANCE, "ensemble.severity.weights")?;

        if let Some(penalty) = &self.penalty {
            if !penalty.factor.is_finite() || penalty.factor < 1.0 {
                return Err(RiskError::config_field(
                    format!("penalty factor must be >= 1.0, got {}", penalty.factor),
                    "ensemble.severity.penalty.factor",
                ));
            }
            if !estimators.is_enabled(penalty.indicator) {
                return Err(RiskError::config_field(
                    format!("penalty indicator '{}' is not enabled", penalty.indicator),
                    "ensemble.severity.penalty.indicator",
                ));
            }
        }

        if !(self.scale.lower.is_finite()
            && self.scale.upper.is_finite()
            && self.scale.lower < self.scale.upper)
        {
            return Err(RiskError::config_field(
                format!(
                    "severity scale needs lower < upper, got [{}, {}]",
                    self.scale.lower, self.scale.upper
                ),
                "ensemble.severity.scale",
            ));
        }

        self.tiers.validate()
    }
}
