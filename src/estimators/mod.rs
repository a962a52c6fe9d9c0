//! Unsupervised estimators used by the ensemble.
//!
//! Every estimator implements [`Estimator`], a small capability contract in
//! the style of scikit-learn: `fit_predict` is mandatory and returns native
//! integer labels, while `decision_function`, `predict_proba` and
//! `cluster_centers` are optional. The native conventions deliberately differ
//! between estimators (noise is `-1` for density clustering, anomalies are
//! `-1` with negative decision values for isolation forests); reconciling them
//! is the job of [`crate::core::adapters`].

pub mod density;
pub mod isolation;
pub mod mixture;
pub mod partition;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::config::EstimatorSuiteConfig;
use crate::core::errors::Result;

pub use density::Dbscan;
pub use isolation::IsolationForest;
pub use mixture::GaussianMixture;
pub use partition::KMeans;

/// The four estimator slots of the ensemble.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Partition-based clustering with a fixed number of partitions
    Partition,
    /// Density-based clustering with a noise label
    Density,
    /// Probabilistic mixture with per-component membership probabilities
    Mixture,
    /// Isolation-based anomaly scoring
    Isolation,
}

impl EstimatorKind {
    /// Every kind, in pipeline order
    pub const ALL: [Self; 4] = [Self::Partition, Self::Density, Self::Mixture, Self::Isolation];

    /// Stable snake_case name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Partition => "partition",
            Self::Density => "density",
            Self::Mixture => "mixture",
            Self::Isolation => "isolation",
        }
    }

    /// Whether the estimator groups users into unlabeled partitions whose
    /// risk meaning must be identified per run
    pub const fn is_partitioning(self) -> bool {
        matches!(self, Self::Partition | Self::Mixture)
    }

    /// Per-kind seed derived from the run seed so estimators never share a stream
    pub const fn derive_seed(self, run_seed: u64) -> u64 {
        let offset = match self {
            Self::Partition => 0x9E37_79B9_7F4A_7C15,
            Self::Density => 0xBF58_476D_1CE4_E5B9,
            Self::Mixture => 0x94D0_49BB_1331_11EB,
            Self::Isolation => 0x2545_F491_4F6C_DD1D,
        };
        run_seed ^ offset
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability contract shared by every estimator.
pub trait Estimator: Send {
    /// Estimator name used in logs and errors
    fn name(&self) -> &str;

    /// Fit on the matrix and return one native label per row
    fn fit_predict(&mut self, x: ArrayView2<'_, f64>) -> Result<Array1<i64>>;

    /// Continuous score per row in the estimator's native sign convention
    fn decision_function(&self, _x: ArrayView2<'_, f64>) -> Option<Result<Array1<f64>>> {
        None
    }

    /// Membership probability per row and partition
    fn predict_proba(&self, _x: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
        None
    }

    /// Partition centers in the fitted feature space
    fn cluster_centers(&self) -> Option<Array2<f64>> {
        None
    }

    /// Diagnostics collected while fitting
    fn fit_metrics(&self) -> IndexMap<String, f64> {
        IndexMap::new()
    }
}

/// Builds a fresh estimator for one run from the per-kind seed.
pub type EstimatorFactory = Arc<dyn Fn(u64) -> Box<dyn Estimator> + Send + Sync>;

/// Factory for the built-in implementation of an estimator kind.
pub fn builtin_factory(kind: EstimatorKind, suite: &EstimatorSuiteConfig) -> EstimatorFactory {
    match kind {
        EstimatorKind::Partition => {
            let config = suite.partition.clone();
            Arc::new(move |seed: u64| Box::new(KMeans::new(&config, seed)) as Box<dyn Estimator>)
        }
        EstimatorKind::Density => {
            let config = suite.density.clone();
            Arc::new(move |_seed: u64| Box::new(Dbscan::new(&config)) as Box<dyn Estimator>)
        }
        EstimatorKind::Mixture => {
            let config = suite.mixture.clone();
            Arc::new(move |seed: u64| Box::new(GaussianMixture::new(&config, seed)) as Box<dyn Estimator>)
        }
        EstimatorKind::Isolation => {
            let config = suite.isolation.clone();
            Arc::new(move |seed: u64| Box::new(IsolationForest::new(&config, seed)) as Box<dyn Estimator>)
        }
    }
}

/// Squared Euclidean distance between two rows
pub(crate) fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_kind_names_round_trip_through_serde() {
        for kind in EstimatorKind::ALL {
            let yaml = serde_yaml::to_string(&kind).unwrap();
            assert_eq!(yaml.trim(), kind.as_str());
            let back: EstimatorKind = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_derived_seeds_differ_per_kind() {
        let seeds: Vec<u64> = EstimatorKind::ALL
            .iter()
            .map(|k| k.derive_seed(42))
            .collect();
        for (i, a) in seeds.iter().enumerate() {
            for b in &seeds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_partitioning_kinds() {
        assert!(EstimatorKind::Partition.is_partitioning());
        assert!(EstimatorKind::Mixture.is_partitioning());
        assert!(!EstimatorKind::Density.is_partitioning());
        assert!(!EstimatorKind::Isolation.is_partitioning());
    }

    #[test]
    fn test_squared_distance() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        assert_eq!(squared_distance(a.view(), b.view()), 25.0);
    }

    #[test]
    fn test_builtin_factory_names() {
        let suite = EstimatorSuiteConfig::default();
        for kind in EstimatorKind::ALL {
            let estimator = builtin_factory(kind, &suite)(kind.derive_seed(1));
            assert!(!estimator.name().is_empty());
        }
    }
}
