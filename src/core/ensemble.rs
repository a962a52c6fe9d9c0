//! Ensemble aggregation.
//!
//! Two independent views are combined per user:
//!
//! * a **vote count**: how many voting estimators flag the user, either as
//!   an outlier or as a member of their risk partition, mapped to a
//!   [`RiskTier`];
//! * a **severity index**: a weighted sum of normalized risk signals, with an
//!   optional multiplicative penalty when an indicator estimator flags the
//!   user, clamped and rescaled to the configured bounds.
//!
//! Both are computed only over estimators that actually contributed to the
//! run. How an excluded voter or weighted estimator is accounted for is fixed
//! by configuration.

use std::fmt;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::adapters::EstimatorResult;
use crate::core::config::{
    FailedVoterPolicy, SeverityConfig, SeverityPenalty, SeverityScale, TierCutoffs, VotingConfig,
};
use crate::core::errors::{Result, RiskError};
use crate::core::featureset::UserId;
use crate::core::risk_partition::PartitionRiskMap;
use crate::estimators::EstimatorKind;

/// Discrete risk band.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// No or negligible signal
    #[default]
    Low,
    /// Some signal
    Moderate,
    /// Strong signal
    High,
    /// Unanimous or near-unanimous signal
    Critical,
}

impl RiskTier {
    /// Every tier from lowest to highest
    pub const ALL: [Self; 4] = [Self::Low, Self::Moderate, Self::High, Self::Critical];

    /// Stable snake_case name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RiskError::config(format!("unknown risk tier '{s}'")))
    }
}

/// Whether an estimator flags a user: outlier-capable estimators flag
/// outliers, partitioning estimators flag members of their risk partition.
pub fn vote_flags(result: &EstimatorResult, risk_map: Option<&PartitionRiskMap>) -> Vec<bool> {
    match (result.estimator.is_partitioning(), risk_map) {
        (true, Some(map)) => result
            .records
            .iter()
            .map(|r| map.is_risk_member(r.partition_id))
            .collect(),
        (true, None) => vec![false; result.records.len()],
        (false, _) => result.records.iter().map(|r| r.is_outlier).collect(),
    }
}

/// Vote thresholds resolved for the voters that contributed to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotePlan {
    /// Voters whose flags are counted
    pub active_voters: Vec<EstimatorKind>,
    /// Voters configured but excluded from this run
    pub excluded_voters: Vec<EstimatorKind>,
    /// Number of voters a vote count is out of
    pub denominator: usize,
    /// Votes needed for High
    pub threshold: usize,
    /// Votes needed for Critical
    pub critical_threshold: usize,
}

impl VotePlan {
    /// Resolve thresholds given the estimators that contributed.
    ///
    /// Under [`FailedVoterPolicy::ShrinkDenominator`] both thresholds are
    /// rescaled to `ceil(t * active / configured)`, never below one vote.
    /// Under [`FailedVoterPolicy::CountAsNotFlagged`] they stay as configured
    /// and excluded voters simply never vote.
    pub fn resolve(config: &VotingConfig, contributing: &[EstimatorKind]) -> Self {
        let configured = config.voters.len();
        let critical = config.critical_threshold.unwrap_or(configured);
        let (active_voters, excluded_voters): (Vec<_>, Vec<_>) = config
            .voters
            .iter()
            .copied()
            .partition(|v| contributing.contains(v));
        let active = active_voters.len();

        let (denominator, threshold, critical_threshold) = match config.failed_voters {
            FailedVoterPolicy::CountAsNotFlagged => (configured, config.threshold, critical),
            FailedVoterPolicy::ShrinkDenominator if active == configured => {
                (configured, config.threshold, critical)
            }
            FailedVoterPolicy::ShrinkDenominator => {
                let rescale = |t: usize| ((t * active + configured - 1) / configured).max(1);
                let threshold = rescale(config.threshold);
                (active, threshold, rescale(critical).max(threshold))
            }
        };

        if active == 0 {
            warn!("no voter contributed to the run; every user is classified Low");
        } else if !excluded_voters.is_empty() {
            debug!(
                ?excluded_voters,
                denominator, threshold, critical_threshold, "vote thresholds resolved"
            );
        }

        Self {
            active_voters,
            excluded_voters,
            denominator,
            threshold,
            critical_threshold,
        }
    }

    /// Tier for a vote count
    pub fn tier_for(&self, votes: usize) -> RiskTier {
        if self.active_voters.is_empty() || votes == 0 {
            RiskTier::Low
        } else if votes >= self.critical_threshold {
            RiskTier::Critical
        } else if votes >= self.threshold {
            RiskTier::High
        } else {
            RiskTier::Moderate
        }
    }
}

/// Severity weights resolved for the estimators that contributed to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityPlan {
    /// Renormalized weights of contributing estimators; sum to 1.0
    pub weights: IndexMap<EstimatorKind, f64>,
    /// Penalty, dropped when its indicator did not contribute
    pub penalty: Option<SeverityPenalty>,
    /// Reported severity bounds
    pub scale: SeverityScale,
    /// Severity tier cutoffs
    pub tiers: TierCutoffs,
}

impl SeverityPlan {
    /// Resolve weights over the estimators that contributed.
    ///
    /// Weights of excluded estimators are dropped and the rest renormalized.
    /// Fails when no weighted estimator contributed or the remaining weights
    /// sum to zero.
    pub fn resolve(config: &SeverityConfig, contributing: &[EstimatorKind]) -> Result<Self> {
        let kept: IndexMap<EstimatorKind, f64> = config
            .weights
            .iter()
            .filter(|(kind, _)| contributing.contains(*kind))
            .map(|(kind, w)| (*kind, *w))
            .collect();
        let total: f64 = kept.values().sum();
        if kept.is_empty() || total <= 0.0 {
            return Err(RiskError::pipeline(
                "ensemble",
                "no weighted estimator contributed; severity cannot be computed",
            ));
        }

        let weights: IndexMap<EstimatorKind, f64> =
            kept.into_iter().map(|(kind, w)| (kind, w / total)).collect();
        if weights.len() < config.weights.len() {
            debug!(?weights, "severity weights renormalized");
        }

        Ok(Self {
            weights,
            penalty: config
                .penalty
                .clone()
                .filter(|p| contributing.contains(&p.indicator)),
            scale: config.scale,
            tiers: config.tiers,
        })
    }

    /// Weighted, penalized and clamped severity in [0, 1]
    pub fn unit_severity(
        &self,
        normalized: &IndexMap<EstimatorKind, f64>,
        flagged_by: &[EstimatorKind],
    ) -> f64 {
        let base: f64 = self
            .weights
            .iter()
            .map(|(kind, w)| w * normalized.get(kind).copied().unwrap_or(0.0))
            .sum();
        let penalized = match &self.penalty {
            Some(p) if flagged_by.contains(&p.indicator) => base * p.factor,
            _ => base,
        };
        penalized.clamp(0.0, 1.0)
    }
}

/// Final per-user outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    /// User the assessment belongs to
    pub user_id: UserId,
    /// Number of voting estimators flagging the user
    pub vote_count: usize,
    /// Number of voters the count is out of
    pub vote_denominator: usize,
    /// Tier derived from the vote count
    pub risk_tier: RiskTier,
    /// Severity on the configured scale
    pub severity_index: f64,
    /// Severity before rescaling, in [0, 1]
    pub unit_severity: f64,
    /// Tier derived from the unit severity
    pub severity_tier: RiskTier,
    /// Contributing estimators that flagged the user, voters or not
    pub flagged_by: Vec<EstimatorKind>,
}

/// Per-run inputs of the aggregator, aligned to the matrix rows.
#[derive(Debug, Default)]
pub struct EnsembleInputs {
    /// Vote flag per contributing estimator
    pub flags: IndexMap<EstimatorKind, Vec<bool>>,
    /// Normalized signal per contributing estimator
    pub normalized: IndexMap<EstimatorKind, Vec<f64>>,
}

/// Combines flags and normalized signals into assessments.
#[derive(Debug, Clone)]
pub struct EnsembleAggregator {
    votes: VotePlan,
    severity: SeverityPlan,
}

impl EnsembleAggregator {
    /// Create an aggregator from resolved plans
    pub fn new(votes: VotePlan, severity: SeverityPlan) -> Self {
        Self { votes, severity }
    }

    /// Resolved vote plan
    pub fn vote_plan(&self) -> &VotePlan {
        &self.votes
    }

    /// Resolved severity plan
    pub fn severity_plan(&self) -> &SeverityPlan {
        &self.severity
    }

    /// Assess every user
    pub fn aggregate(&self, user_ids: &[UserId], inputs: &EnsembleInputs) -> Result<Vec<RiskAssessment>> {
        let n = user_ids.len();
        for (kind, column) in inputs.flags.iter() {
            if column.len() != n {
                return Err(RiskError::internal(format!(
                    "flags of '{kind}' cover {} users, expected {n}",
                    column.len()
                )));
            }
        }
        for (kind, column) in inputs.normalized.iter() {
            if column.len() != n {
                return Err(RiskError::internal(format!(
                    "signal of '{kind}' covers {} users, expected {n}",
                    column.len()
                )));
            }
        }
        for kind in self.severity.weights.keys() {
            if !inputs.normalized.contains_key(kind) {
                return Err(RiskError::internal(format!("no normalized signal for '{kind}'")));
            }
        }

        Ok(user_ids
            .par_iter()
            .enumerate()
            .map(|(i, user_id)| {
                let flagged_by: Vec<EstimatorKind> = inputs
                    .flags
                    .iter()
                    .filter(|(_, column)| column[i])
                    .map(|(kind, _)| *kind)
                    .collect();
                let vote_count = self
                    .votes
                    .active_voters
                    .iter()
                    .filter(|voter| flagged_by.contains(*voter))
                    .count();

                let normalized: IndexMap<EstimatorKind, f64> = inputs
                    .normalized
                    .iter()
                    .map(|(kind, column)| (*kind, column[i]))
                    .collect();
                let unit_severity = self.severity.unit_severity(&normalized, &flagged_by);

                RiskAssessment {
                    user_id: user_id.clone(),
                    vote_count,
                    vote_denominator: self.votes.denominator,
                    risk_tier: self.votes.tier_for(vote_count),
                    severity_index: self.severity.scale.rescale(unit_severity),
                    unit_severity,
                    severity_tier: self.severity.tiers.tier_for(unit_severity),
                    flagged_by,
                }
            })
            .collect())
    }
}
