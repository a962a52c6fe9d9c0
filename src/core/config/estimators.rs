//! Per-estimator configuration.
//!
//! Each estimator carries its algorithm parameters, a failure policy and a
//! timeout. Failure policy and timeout are fixed at construction time; the
//! pipeline never decides them on its own.

use serde::{Deserialize, Serialize};

use super::validation::{
    validate_non_negative, validate_open_unit_range, validate_positive_f64,
    validate_positive_usize,
};
use crate::core::errors::{Result, RiskError};
use crate::estimators::EstimatorKind;

/// What to do when an estimator fails to fit or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole run
    Fatal,
    /// Drop the estimator from the ensemble and keep going
    #[default]
    Exclude,
}

/// Settings shared by every estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Whether the estimator participates in the run
    #[serde(default = "RunSettings::default_enabled")]
    pub enabled: bool,

    /// Behaviour when the estimator fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Wall-clock budget for one fit, in milliseconds
    #[serde(default = "RunSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            failure_policy: FailurePolicy::default(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl RunSettings {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_timeout_ms() -> u64 {
        30_000
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.timeout_ms == 0 {
            let field = format!("{field}.timeout_ms");
            return Err(RiskError::config_field(
                format!("{field} must be greater than 0"),
                field,
            ));
        }
        Ok(())
    }
}

/// Partition-based estimator (k-means).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Shared run settings
    #[serde(flatten)]
    pub run: RunSettings,

    /// Number of partitions, fixed a priori
    #[serde(default = "PartitionConfig::default_k")]
    pub k: usize,

    /// Lloyd iterations per restart
    #[serde(default = "PartitionConfig::default_max_iterations")]
    pub max_iterations: usize,

    /// Number of seeded restarts; the lowest inertia wins
    #[serde(default = "PartitionConfig::default_n_init")]
    pub n_init: usize,

    /// Convergence threshold on total centroid movement
    #[serde(default = "PartitionConfig::default_tolerance")]
    pub tolerance: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            k: Self::default_k(),
            max_iterations: Self::default_max_iterations(),
            n_init: Self::default_n_init(),
            tolerance: Self::default_tolerance(),
        }
    }
}

impl PartitionConfig {
    const fn default_k() -> usize {
        4
    }

    const fn default_max_iterations() -> usize {
        300
    }

    const fn default_n_init() -> usize {
        10
    }

    const fn default_tolerance() -> f64 {
        1e-4
    }

    /// Validate partition settings
    pub fn validate(&self) -> Result<()> {
        self.run.validate("estimators.partition")?;
        validate_positive_usize(self.k, "estimators.partition.k")?;
        validate_positive_usize(self.max_iterations, "estimators.partition.max_iterations")?;
        validate_positive_usize(self.n_init, "estimators.partition.n_init")?;
        validate_positive_f64(self.tolerance, "estimators.partition.tolerance")
    }
}

/// Density-based estimator (DBSCAN).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Shared run settings
    #[serde(flatten)]
    pub run: RunSettings,

    /// Neighbourhood radius in standardized feature space
    #[serde(default = "DensityConfig::default_eps")]
    pub eps: f64,

    /// Neighbours (including the point itself) required for a core point
    #[serde(default = "DensityConfig::default_min_samples")]
    pub min_samples: usize,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            eps: Self::default_eps(),
            min_samples: Self::default_min_samples(),
        }
    }
}

impl DensityConfig {
    const fn default_eps() -> f64 {
        0.5
    }

    const fn default_min_samples() -> usize {
        5
    }

    /// Validate density settings
    pub fn validate(&self) -> Result<()> {
        self.run.validate("estimators.density")?;
        validate_positive_f64(self.eps, "estimators.density.eps")?;
        validate_positive_usize(self.min_samples, "estimators.density.min_samples")
    }
}

/// Probabilistic mixture estimator (full-covariance Gaussian mixture).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureConfig {
    /// Shared run settings
    #[serde(flatten)]
    pub run: RunSettings,

    /// Number of mixture components
    #[serde(default = "MixtureConfig::default_components")]
    pub components: usize,

    /// EM iterations
    #[serde(default = "MixtureConfig::default_max_iterations")]
    pub max_iterations: usize,

    /// Convergence threshold on the mean log-likelihood
    #[serde(default = "MixtureConfig::default_tolerance")]
    pub tolerance: f64,

    /// Non-negative regularization added to covariance diagonals
    #[serde(default = "MixtureConfig::default_reg_covar")]
    pub reg_covar: f64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            components: Self::default_components(),
            max_iterations: Self::default_max_iterations(),
            tolerance: Self::default_tolerance(),
            reg_covar: Self::default_reg_covar(),
        }
    }
}

impl MixtureConfig {
    const fn default_components() -> usize {
        4
    }

    const fn default_max_iterations() -> usize {
        100
    }

    const fn default_tolerance() -> f64 {
        1e-3
    }

    const fn default_reg_covar() -> f64 {
        1e-6
    }

    /// Validate mixture settings
    pub fn validate(&self) -> Result<()> {
        self.run.validate("estimators.mixture")?;
        validate_positive_usize(self.components, "estimators.mixture.components")?;
        validate_positive_usize(self.max_iterations, "estimators.mixture.max_iterations")?;
        validate_positive_f64(self.tolerance, "estimators.mixture.tolerance")?;
        validate_non_negative(self.reg_covar, "estimators.mixture.reg_covar")
    }
}

/// Isolation-based anomaly estimator (isolation forest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Shared run settings
    #[serde(flatten)]
    pub run: RunSettings,

    /// Expected fraction of anomalous users, in (0, 1]
    #[serde(default = "IsolationConfig::default_contamination")]
    pub contamination: f64,

    /// Number of isolation trees
    #[serde(default = "IsolationConfig::default_n_trees")]
    pub n_trees: usize,

    /// Sub-sample size per tree (capped at the number of users)
    #[serde(default = "IsolationConfig::default_max_samples")]
    pub max_samples: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            contamination: Self::default_contamination(),
            n_trees: Self::default_n_trees(),
            max_samples: Self::default_max_samples(),
        }
    }
}

impl IsolationConfig {
    const fn default_contamination() -> f64 {
        0.05
    }

    const fn default_n_trees() -> usize {
        100
    }

    const fn default_max_samples() -> usize {
        256
    }

    /// Validate isolation settings
    pub fn validate(&self) -> Result<()> {
        self.run.validate("estimators.isolation")?;
        validate_open_unit_range(self.contamination, "estimators.isolation.contamination")?;
        validate_positive_usize(self.n_trees, "estimators.isolation.n_trees")?;
        validate_positive_usize(self.max_samples, "estimators.isolation.max_samples")
    }
}

/// The four estimator slots of the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EstimatorSuiteConfig {
    /// Partition-based estimator
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Density-based estimator
    #[serde(default)]
    pub density: DensityConfig,

    /// Probabilistic mixture estimator
    #[serde(default)]
    pub mixture: MixtureConfig,

    /// Isolation-based estimator
    #[serde(default)]
    pub isolation: IsolationConfig,
}

impl EstimatorSuiteConfig {
    /// Run settings for one estimator kind
    pub fn run_settings(&self, kind: EstimatorKind) -> &RunSettings {
        match kind {
            EstimatorKind::Partition => &self.partition.run,
            EstimatorKind::Density => &self.density.run,
            EstimatorKind::Mixture => &self.mixture.run,
            EstimatorKind::Isolation => &self.isolation.run,
        }
    }

    /// Whether an estimator kind is enabled
    pub fn is_enabled(&self, kind: EstimatorKind) -> bool {
        self.run_settings(kind).enabled
    }

    /// Enabled estimator kinds in pipeline order
    pub fn enabled_kinds(&self) -> Vec<EstimatorKind> {
        EstimatorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Validate every estimator slot
    pub fn validate(&self) -> Result<()> {
        self.partition.validate()?;
        self.density.validate()?;
        self.mixture.validate()?;
        self.isolation.validate()
    }
}
