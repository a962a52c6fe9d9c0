//! Score normalization.
//!
//! Each estimator contributes one continuous risk signal per user. Signals are
//! min-max normalized independently per estimator and run into [0, 1], so that
//! estimators with different native ranges can be combined. A signal with no
//! spread carries no ranking information and normalizes to all zeros.

use serde::{Deserialize, Serialize};

use crate::core::adapters::EstimatorResult;
use crate::core::errors::{DegenerateInputWarning, DegenerateKind, Result, RiskError};
use crate::core::risk_partition::PartitionRiskMap;
use crate::estimators::EstimatorKind;

/// Summary of one estimator's raw signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreStatistics {
    /// Smallest finite value
    pub min: f64,
    /// Largest finite value
    pub max: f64,
    /// Mean of finite values
    pub mean: f64,
    /// Number of finite values
    pub n_samples: usize,
    /// Number of values that were NaN or infinite
    pub n_non_finite: usize,
}

impl ScoreStatistics {
    /// Calculate statistics over the finite values of a slice
    pub fn from_values(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let n_non_finite = values.len() - finite.len();
        if finite.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                n_samples: 0,
                n_non_finite,
            };
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            min,
            max,
            mean: finite.iter().sum::<f64>() / finite.len() as f64,
            n_samples: finite.len(),
            n_non_finite,
        }
    }

    /// Spread of the finite values
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// No spread: min-max normalization is undefined
    pub fn is_degenerate(&self) -> bool {
        self.n_samples == 0 || self.range() < f64::EPSILON
    }
}

/// Min-max normalized signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedScores {
    /// One value in [0, 1] per user
    pub values: Vec<f64>,
    /// Statistics of the raw input
    pub statistics: ScoreStatistics,
}

impl NormalizedScores {
    /// Whether the input had no spread and was mapped to zeros
    pub fn is_degenerate(&self) -> bool {
        self.statistics.is_degenerate()
    }
}

/// Min-max normalize a raw signal.
///
/// Non-finite entries and degenerate inputs map to 0.0. Applying this to an
/// already normalized signal returns it unchanged.
pub fn normalize_min_max(raw: &[f64]) -> NormalizedScores {
    let statistics = ScoreStatistics::from_values(raw);
    let values = if statistics.is_degenerate() {
        vec![0.0; raw.len()]
    } else {
        let range = statistics.range();
        raw.iter()
            .map(|&v| {
                if v.is_finite() {
                    ((v - statistics.min) / range).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    };
    NormalizedScores { values, statistics }
}

/// One estimator's risk signal, raw and normalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorSignal {
    /// Estimator the signal came from
    pub estimator: EstimatorKind,
    /// Raw signal, larger means riskier
    pub raw: Vec<f64>,
    /// Normalized signal
    pub normalized: NormalizedScores,
}

/// Raw risk signal of an estimator, larger meaning riskier.
///
/// Partitioning and outlier estimators use their raw score; the mixture
/// estimator uses each user's probability of belonging to the risk partition,
/// which requires the risk map.
pub fn risk_signal(result: &EstimatorResult, risk_map: Option<&PartitionRiskMap>) -> Result<Vec<f64>> {
    match result.estimator {
        EstimatorKind::Mixture => {
            let map = risk_map.ok_or_else(|| {
                RiskError::pipeline(
                    "normalization",
                    "mixture signal needs an identified risk partition",
                )
            })?;
            Ok(result
                .records
                .iter()
                .map(|r| {
                    r.partition_probabilities
                        .as_ref()
                        .and_then(|p| p.get(map.risk_partition).copied())
                        .unwrap_or(f64::NAN)
                })
                .collect())
        }
        _ => Ok(result
            .records
            .iter()
            .map(|r| r.raw_score.unwrap_or(f64::NAN))
            .collect()),
    }
}

/// Extract and normalize an estimator's signal, warning when it is degenerate
pub fn normalize_signal(
    result: &EstimatorResult,
    risk_map: Option<&PartitionRiskMap>,
) -> Result<(EstimatorSignal, Option<DegenerateInputWarning>)> {
    let raw = risk_signal(result, risk_map)?;
    let normalized = normalize_min_max(&raw);

    let warning = normalized.is_degenerate().then(|| {
        DegenerateInputWarning::emit(
            DegenerateKind::ConstantScores {
                estimator: result.estimator.to_string(),
            },
            "every user received the same score; normalized contribution set to 0",
        )
    });

    Ok((
        EstimatorSignal {
            estimator: result.estimator,
            raw,
            normalized,
        },
        warning,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapters::UserEstimate;
    use crate::core::risk_partition::RiskPartitionPolicy;
    use approx::assert_relative_eq;
    use indexmap::IndexMap;

    fn result(kind: EstimatorKind, estimates: Vec<UserEstimate>) -> EstimatorResult {
        EstimatorResult {
            estimator: kind,
            name: kind.to_string(),
            records: estimates,
            centers: None,
            fit_metrics: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    fn scored(score: f64) -> UserEstimate {
        UserEstimate {
            user_id: "u".into(),
            partition_id: None,
            is_outlier: false,
            raw_score: Some(score),
            partition_probabilities: None,
        }
    }

    #[test]
    fn test_min_max_bounds() {
        let normalized = normalize_min_max(&[2.0, 4.0, 6.0]);
        assert_eq!(normalized.values, vec![0.0, 0.5, 1.0]);
        assert_eq!(normalized.statistics.min, 2.0);
        assert_eq!(normalized.statistics.max, 6.0);
        assert!(!normalized.is_degenerate());
    }

    #[test]
    fn test_degenerate_input_maps_to_zero() {
        let normalized = normalize_min_max(&[3.0, 3.0, 3.0]);
        assert_eq!(normalized.values, vec![0.0, 0.0, 0.0]);
        assert!(normalized.is_degenerate());
    }

    #[test]
    fn test_non_finite_values_map_to_zero() {
        let normalized = normalize_min_max(&[1.0, f64::NAN, 3.0, f64::INFINITY]);
        assert_eq!(normalized.values, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(normalized.statistics.n_non_finite, 2);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_min_max(&[0.3, -1.2, 7.5, 2.2]);
        let twice = normalize_min_max(&once.values);
        for (a, b) in once.values.iter().zip(&twice.values) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_constant_signal_warns() {
        let res = result(EstimatorKind::Isolation, vec![scored(0.1), scored(0.1)]);
        let (signal, warning) = normalize_signal(&res, None).unwrap();
        assert_eq!(signal.normalized.values, vec![0.0, 0.0]);
        assert!(matches!(
            warning.map(|w| w.kind),
            Some(DegenerateKind::ConstantScores { .. })
        ));
    }

    #[test]
    fn test_mixture_signal_uses_risk_partition_probability() {
        let estimate = |p: Vec<f64>| UserEstimate {
            user_id: "u".into(),
            partition_id: Some(0),
            is_outlier: false,
            raw_score: None,
            partition_probabilities: Some(p),
        };
        let res = result(
            EstimatorKind::Mixture,
            vec![estimate(vec![0.9, 0.1]), estimate(vec![0.2, 0.8])],
        );
        let map = PartitionRiskMap {
            estimator: EstimatorKind::Mixture,
            policy: RiskPartitionPolicy::CentroidNorm,
            risk_partition: 1,
            partition_values: IndexMap::new(),
            partition_sizes: IndexMap::new(),
            ranking: vec![0, 1],
        };

        assert_eq!(risk_signal(&res, Some(&map)).unwrap(), vec![0.1, 0.8]);
        assert!(risk_signal(&res, None).is_err());
    }
}
