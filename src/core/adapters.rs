//! Estimator adapters.
//!
//! An adapter runs one [`Estimator`] over the feature matrix and reconciles
//! its native output conventions into an [`EstimatorResult`]: one
//! [`UserEstimate`] per matrix row, with a uniform outlier flag and a raw
//! score oriented so that larger always means more anomalous.
//!
//! | kind      | partition id       | outlier flag      | raw score                      |
//! |-----------|--------------------|-------------------|--------------------------------|
//! | partition | native label       | never             | distance to assigned center    |
//! | density   | label, none if -1  | label == -1       | 1.0 for noise, 0.0 otherwise   |
//! | mixture   | argmax probability | never             | none (probabilities kept)      |
//! | isolation | none               | label == -1       | negated decision function      |

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{DegenerateInputWarning, DegenerateKind, Result, RiskError};
use crate::core::featureset::{FeatureMatrix, UserId};
use crate::estimators::{squared_distance, Estimator, EstimatorKind};

/// Tolerance on membership probabilities summing to one
const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// One estimator's verdict on one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEstimate {
    /// User the estimate belongs to
    pub user_id: UserId,

    /// Assigned partition, for estimators that partition users
    pub partition_id: Option<usize>,

    /// Whether the estimator considers the user an outlier
    pub is_outlier: bool,

    /// Continuous score, larger means more anomalous
    pub raw_score: Option<f64>,

    /// Membership probability per partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_probabilities: Option<Vec<f64>>,
}

/// Uniform output of one estimator, aligned to the feature matrix rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorResult {
    /// Estimator slot
    pub estimator: EstimatorKind,

    /// Name reported by the estimator implementation
    pub name: String,

    /// One estimate per matrix row
    pub records: Vec<UserEstimate>,

    /// Partition centers in standardized feature space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centers: Option<Array2<f64>>,

    /// Fit diagnostics
    #[serde(default)]
    pub fit_metrics: IndexMap<String, f64>,

    /// Degenerate conditions seen while adapting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DegenerateInputWarning>,
}

impl EstimatorResult {
    /// Number of partitions known to the estimator: the center count when
    /// available, otherwise the highest assigned id plus one
    pub fn n_partitions(&self) -> usize {
        let from_labels = self
            .records
            .iter()
            .filter_map(|r| r.partition_id)
            .max()
            .map_or(0, |max| max + 1);
        self.centers
            .as_ref()
            .map_or(from_labels, |c| c.nrows().max(from_labels))
    }

    /// Member count per partition id, including empty partitions
    pub fn partition_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_partitions()];
        for id in self.records.iter().filter_map(|r| r.partition_id) {
            sizes[id] += 1;
        }
        sizes
    }

    /// Number of users flagged as outliers
    pub fn outlier_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_outlier).count()
    }
}

/// Runs one estimator and normalizes its output.
pub struct EstimatorAdapter {
    kind: EstimatorKind,
    estimator: Box<dyn Estimator>,
}

impl EstimatorAdapter {
    /// Wrap an estimator for a slot
    pub fn new(kind: EstimatorKind, estimator: Box<dyn Estimator>) -> Self {
        Self { kind, estimator }
    }

    /// Estimator slot
    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    /// Fit the estimator and adapt its output
    pub fn run(mut self, matrix: &FeatureMatrix) -> Result<EstimatorResult> {
        let x = matrix.view();
        let labels = self.estimator.fit_predict(x)?;
        if labels.len() != matrix.n_users() {
            return Err(self.fail(format!(
                "returned {} labels for {} users",
                labels.len(),
                matrix.n_users()
            )));
        }

        let centers = self.estimator.cluster_centers();
        let records = match self.kind {
            EstimatorKind::Partition => self.adapt_partition(matrix, &labels, centers.as_ref())?,
            EstimatorKind::Density => self.adapt_density(matrix, &labels),
            EstimatorKind::Mixture => self.adapt_mixture(matrix, &labels)?,
            EstimatorKind::Isolation => self.adapt_isolation(matrix, &labels)?,
        };

        let mut result = EstimatorResult {
            estimator: self.kind,
            name: self.estimator.name().to_string(),
            records,
            centers,
            fit_metrics: self.estimator.fit_metrics(),
            warnings: Vec::new(),
        };

        if matches!(self.kind, EstimatorKind::Density | EstimatorKind::Isolation)
            && result.outlier_count() == 0
        {
            result.warnings.push(DegenerateInputWarning::emit(
                DegenerateKind::NoOutliersFlagged {
                    estimator: self.kind.to_string(),
                },
                "no user was flagged as an outlier",
            ));
        }

        debug!(
            estimator = %self.kind,
            outliers = result.outlier_count(),
            partitions = result.n_partitions(),
            "estimator output adapted"
        );
        Ok(result)
    }

    fn fail(&self, message: impl Into<String>) -> RiskError {
        RiskError::estimator_fit(self.kind.as_str(), message)
    }

    fn partition_label(&self, label: i64) -> Result<usize> {
        usize::try_from(label).map_err(|_| self.fail(format!("unexpected negative label {label}")))
    }

    fn adapt_partition(
        &self,
        matrix: &FeatureMatrix,
        labels: &Array1<i64>,
        centers: Option<&Array2<f64>>,
    ) -> Result<Vec<UserEstimate>> {
        let centers = centers.ok_or_else(|| self.fail("estimator does not expose centers"))?;
        if centers.ncols() != matrix.n_features() {
            return Err(self.fail("center dimensionality does not match the feature matrix"));
        }

        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let id = self.partition_label(label)?;
                if id >= centers.nrows() {
                    return Err(self.fail(format!("label {id} has no center")));
                }
                let distance = squared_distance(matrix.values.row(i), centers.row(id)).sqrt();
                Ok(UserEstimate {
                    user_id: matrix.user_ids[i].clone(),
                    partition_id: Some(id),
                    is_outlier: false,
                    raw_score: Some(distance),
                    partition_probabilities: None,
                })
            })
            .collect()
    }

    fn adapt_density(&self, matrix: &FeatureMatrix, labels: &Array1<i64>) -> Vec<UserEstimate> {
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let partition_id = usize::try_from(label).ok();
                let is_outlier = partition_id.is_none();
                UserEstimate {
                    user_id: matrix.user_ids[i].clone(),
                    partition_id,
                    is_outlier,
                    raw_score: Some(if is_outlier { 1.0 } else { 0.0 }),
                    partition_probabilities: None,
                }
            })
            .collect()
    }

    fn adapt_mixture(
        &self,
        matrix: &FeatureMatrix,
        labels: &Array1<i64>,
    ) -> Result<Vec<UserEstimate>> {
        let proba = self
            .estimator
            .predict_proba(matrix.view())
            .ok_or_else(|| self.fail("estimator does not expose membership probabilities"))??;
        if proba.nrows() != matrix.n_users() {
            return Err(self.fail("probability rows do not match the feature matrix"));
        }

        labels
            .iter()
            .zip(proba.outer_iter())
            .enumerate()
            .map(|(i, (&label, row))| {
                let id = self.partition_label(label)?;
                let total: f64 = row.sum();
                if !total.is_finite() || (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(self.fail(format!(
                        "membership probabilities of user '{}' sum to {total}",
                        matrix.user_ids[i]
                    )));
                }
                if id >= row.len() {
                    return Err(self.fail(format!("label {id} has no probability column")));
                }
                Ok(UserEstimate {
                    user_id: matrix.user_ids[i].clone(),
                    partition_id: Some(id),
                    is_outlier: false,
                    raw_score: None,
                    partition_probabilities: Some(row.to_vec()),
                })
            })
            .collect()
    }

    fn adapt_isolation(
        &self,
        matrix: &FeatureMatrix,
        labels: &Array1<i64>,
    ) -> Result<Vec<UserEstimate>> {
        let decision = self
            .estimator
            .decision_function(matrix.view())
            .ok_or_else(|| self.fail("estimator does not expose a decision function"))??;
        if decision.len() != matrix.n_users() {
            return Err(self.fail("decision values do not match the feature matrix"));
        }

        labels
            .iter()
            .zip(decision.iter())
            .enumerate()
            .map(|(i, (&label, &value))| {
                let is_outlier = match label {
                    -1 => true,
                    1 => false,
                    other => return Err(self.fail(format!("unexpected label {other}"))),
                };
                if !value.is_finite() {
                    return Err(self.fail(format!(
                        "non-finite decision value for user '{}'",
                        matrix.user_ids[i]
                    )));
                }
                Ok(UserEstimate {
                    user_id: matrix.user_ids[i].clone(),
                    partition_id: None,
                    is_outlier,
                    raw_score: Some(-value),
                    partition_probabilities: None,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayView2};

    fn matrix() -> FeatureMatrix {
        let values = array![[0.0, 0.0], [1.0, 0.0], [0.0, 3.0]];
        FeatureMatrix {
            user_ids: vec!["a".into(), "b".into(), "c".into()],
            feature_names: vec!["x".into(), "y".into()],
            raw: values.clone(),
            values,
        }
    }

    /// Estimator with canned outputs
    struct Canned {
        labels: Array1<i64>,
        decision: Option<Array1<f64>>,
        proba: Option<Array2<f64>>,
        centers: Option<Array2<f64>>,
    }

    impl Canned {
        fn labels(labels: Vec<i64>) -> Self {
            Self {
                labels: Array1::from(labels),
                decision: None,
                proba: None,
                centers: None,
            }
        }
    }

    impl Estimator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn fit_predict(&mut self, _x: ArrayView2<'_, f64>) -> Result<Array1<i64>> {
            Ok(self.labels.clone())
        }

        fn decision_function(&self, _x: ArrayView2<'_, f64>) -> Option<Result<Array1<f64>>> {
            self.decision.clone().map(Ok)
        }

        fn predict_proba(&self, _x: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
            self.proba.clone().map(Ok)
        }

        fn cluster_centers(&self) -> Option<Array2<f64>> {
            self.centers.clone()
        }
    }

    fn run(kind: EstimatorKind, estimator: Canned) -> Result<EstimatorResult> {
        EstimatorAdapter::new(kind, Box::new(estimator)).run(&matrix())
    }

    #[test]
    fn test_partition_scores_are_center_distances() {
        let mut canned = Canned::labels(vec![0, 0, 1]);
        canned.centers = Some(array![[0.0, 0.0], [0.0, 3.0]]);
        let result = run(EstimatorKind::Partition, canned).unwrap();

        let scores: Vec<f64> = result.records.iter().map(|r| r.raw_score.unwrap()).collect();
        assert_eq!(scores, vec![0.0, 1.0, 0.0]);
        assert_eq!(result.partition_sizes(), vec![2, 1]);
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn test_partition_without_centers_fails() {
        let err = run(EstimatorKind::Partition, Canned::labels(vec![0, 0, 1])).unwrap_err();
        assert_eq!(err.estimator(), Some("partition"));
    }

    #[test]
    fn test_density_noise_becomes_outlier() {
        let result = run(EstimatorKind::Density, Canned::labels(vec![0, -1, 0])).unwrap();
        assert_eq!(result.records[1].partition_id, None);
        assert!(result.records[1].is_outlier);
        assert_eq!(result.records[1].raw_score, Some(1.0));
        assert_eq!(result.records[0].raw_score, Some(0.0));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_density_without_noise_warns() {
        let result = run(EstimatorKind::Density, Canned::labels(vec![0, 0, 1])).unwrap();
        assert!(matches!(
            result.warnings[0].kind,
            DegenerateKind::NoOutliersFlagged { .. }
        ));
    }

    #[test]
    fn test_isolation_orientation_is_flipped() {
        let mut canned = Canned::labels(vec![1, -1, 1]);
        canned.decision = Some(array![0.2, -0.3, 0.1]);
        let result = run(EstimatorKind::Isolation, canned).unwrap();

        assert!(result.records[1].is_outlier);
        assert_eq!(result.records[1].raw_score, Some(0.3));
        assert_eq!(result.records[0].raw_score, Some(-0.2));
    }

    #[test]
    fn test_isolation_rejects_unknown_labels() {
        let mut canned = Canned::labels(vec![1, 0, 1]);
        canned.decision = Some(array![0.2, -0.3, 0.1]);
        assert!(run(EstimatorKind::Isolation, canned).is_err());
    }

    #[test]
    fn test_mixture_probabilities_must_sum_to_one() {
        let mut canned = Canned::labels(vec![0, 1, 1]);
        canned.proba = Some(array![[0.9, 0.1], [0.2, 0.8], [0.5, 0.5]]);
        let result = run(EstimatorKind::Mixture, canned).unwrap();
        assert_eq!(
            result.records[1].partition_probabilities,
            Some(vec![0.2, 0.8])
        );

        let mut broken = Canned::labels(vec![0, 1, 1]);
        broken.proba = Some(array![[0.9, 0.3], [0.2, 0.8], [0.5, 0.5]]);
        let err = run(EstimatorKind::Mixture, broken).unwrap_err();
        assert!(err.to_string().contains("sum to"));
    }

    #[test]
    fn test_label_count_mismatch_fails() {
        let err = run(EstimatorKind::Density, Canned::labels(vec![0, 0])).unwrap_err();
        assert!(err.to_string().contains("2 labels for 3 users"));
    }
}
