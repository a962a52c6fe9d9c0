//! Risk cluster identification.
//!
//! Partition ids from unsupervised estimators carry no meaning of their own;
//! they can be permuted between runs. This module decides, once per run and
//! per partitioning estimator, which partition represents elevated risk,
//! using a configured policy over partition properties rather than over ids.

use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::adapters::EstimatorResult;
use crate::core::ensemble::RiskTier;
use crate::core::errors::{DegenerateInputWarning, DegenerateKind, Result, RiskError};
use crate::core::featureset::FeatureMatrix;
use crate::estimators::EstimatorKind;

/// Policy deciding which partition is the risk partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RiskPartitionPolicy {
    /// The partition whose center is closest to the origin of the
    /// standardized space, i.e. uniformly below-average activity
    #[default]
    CentroidNorm,
    /// The partition whose members have the highest mean of one
    /// standardized feature
    FeatureMean {
        /// Feature whose mean ranks the partitions
        feature: String,
    },
}

impl RiskPartitionPolicy {
    /// Whether a higher policy value means more risk
    fn higher_is_riskier(&self) -> bool {
        matches!(self, Self::FeatureMean { .. })
    }
}

/// Per-run mapping from partition ids to risk, for one estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRiskMap {
    /// Estimator the map belongs to
    pub estimator: EstimatorKind,

    /// Policy that produced the map
    pub policy: RiskPartitionPolicy,

    /// The partition representing elevated risk
    pub risk_partition: usize,

    /// Policy value per non-empty partition, keyed by partition id
    pub partition_values: IndexMap<usize, f64>,

    /// Member count per partition id, empty partitions included
    pub partition_sizes: IndexMap<usize, usize>,

    /// Non-empty partitions ordered from least to most risky
    pub ranking: Vec<usize>,
}

impl PartitionRiskMap {
    /// Whether a partition id is the risk partition
    pub fn is_risk_member(&self, partition_id: Option<usize>) -> bool {
        partition_id == Some(self.risk_partition)
    }

    /// Rank of a partition, 0 being the least risky
    pub fn risk_rank(&self, partition_id: usize) -> Option<usize> {
        self.ranking.iter().position(|&p| p == partition_id)
    }

    /// Tier of a partition by its rank; the most risky partition is always
    /// Critical and the others are spread evenly below it
    pub fn partition_tier(&self, partition_id: usize) -> Option<RiskTier> {
        let rank = self.risk_rank(partition_id)?;
        let m = self.ranking.len();
        let steps_below_top = (m - 1 - rank) * RiskTier::ALL.len() / m;
        Some(RiskTier::ALL[RiskTier::ALL.len() - 1 - steps_below_top])
    }
}

/// Identify the risk partition of a partitioning estimator's result.
///
/// Only non-empty partitions are eligible. Ties go to the lowest id.
pub fn identify_risk_partition(
    result: &EstimatorResult,
    matrix: &FeatureMatrix,
    policy: &RiskPartitionPolicy,
) -> Result<(PartitionRiskMap, Vec<DegenerateInputWarning>)> {
    let kind = result.estimator;
    let sizes = result.partition_sizes();
    let mut warnings = Vec::new();

    for (id, &size) in sizes.iter().enumerate() {
        if size == 0 {
            warnings.push(DegenerateInputWarning::emit(
                DegenerateKind::EmptyPartition {
                    estimator: kind.to_string(),
                    partition: id,
                },
                format!("partition {id} has no members and is not eligible as risk partition"),
            ));
        }
    }

    let mut values = IndexMap::new();
    for (id, &size) in sizes.iter().enumerate().filter(|(_, size)| **size > 0) {
        let value = match policy {
            RiskPartitionPolicy::CentroidNorm => {
                let center = centroid(result, matrix, id, size);
                center.dot(&center).sqrt()
            }
            RiskPartitionPolicy::FeatureMean { feature } => {
                let column = matrix.column(feature).ok_or_else(|| {
                    RiskError::pipeline(
                        "risk_partition",
                        format!("feature '{feature}' is not part of the feature matrix"),
                    )
                })?;
                let total: f64 = result
                    .records
                    .iter()
                    .zip(column.iter())
                    .filter(|(r, _)| r.partition_id == Some(id))
                    .map(|(_, v)| v)
                    .sum();
                total / size as f64
            }
        };
        values.insert(id, value);
    }

    if values.is_empty() {
        return Err(RiskError::pipeline(
            "risk_partition",
            format!("estimator '{kind}' assigned no user to any partition"),
        ));
    }

    // Least risky first; among equal values the lowest id ends up last
    let higher_is_riskier = policy.higher_is_riskier();
    let mut ranking: Vec<usize> = values.keys().copied().collect();
    ranking.sort_by(|a, b| {
        let (va, vb) = (values[a], values[b]);
        let by_value = if higher_is_riskier {
            va.total_cmp(&vb)
        } else {
            vb.total_cmp(&va)
        };
        by_value.then(b.cmp(a))
    });
    let risk_partition = *ranking
        .last()
        .ok_or_else(|| RiskError::internal("empty partition ranking"))?;

    debug!(
        estimator = %kind,
        risk_partition,
        value = values[&risk_partition],
        "risk partition identified"
    );

    Ok((
        PartitionRiskMap {
            estimator: kind,
            policy: policy.clone(),
            risk_partition,
            partition_values: values,
            partition_sizes: sizes.into_iter().enumerate().collect(),
            ranking,
        },
        warnings,
    ))
}

/// Center of a partition: the estimator's own center when exposed, otherwise
/// the mean of its members
fn centroid(
    result: &EstimatorResult,
    matrix: &FeatureMatrix,
    id: usize,
    size: usize,
) -> Array1<f64> {
    if let Some(centers) = &result.centers {
        if id < centers.nrows() && centers.ncols() == matrix.n_features() {
            return centers.row(id).to_owned();
        }
    }
    let mut sum = Array1::<f64>::zeros(matrix.n_features());
    for (i, record) in result.records.iter().enumerate() {
        if record.partition_id == Some(id) {
            sum += &matrix.values.row(i);
        }
    }
    sum / size as f64
}
