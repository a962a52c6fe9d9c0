//! Configuration types and management for aura-risk.
//!
//! The configuration surface is explicit and enumerated: feature schema,
//! estimator parameters and failure policies, the risk-partition policy and
//! the ensemble aggregation policies. Everything is validated once, when a
//! [`crate::RiskEngine`] is constructed, before any estimator runs.

pub mod ensemble;
pub mod estimators;
pub mod validation;

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RiskError};
use crate::core::featureset::{FeatureDefinition, MissingColumnPolicy};
use crate::core::risk_partition::RiskPartitionPolicy;

pub use ensemble::{
    EnsembleConfig, FailedVoterPolicy, SeverityConfig, SeverityPenalty, SeverityScale,
    TierCutoffs, VotingConfig,
};
pub use estimators::{
    DensityConfig, EstimatorSuiteConfig, FailurePolicy, IsolationConfig, MixtureConfig,
    PartitionConfig, RunSettings,
};
pub use validation::{
    validate_bounded_usize, validate_non_negative, validate_open_unit_range,
    validate_positive_f64, validate_positive_usize, validate_weights_sum,
};

/// Feature schema configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Ordered features that make up the matrix
    #[serde(default = "FeatureConfig::default_features")]
    pub features: Vec<FeatureDefinition>,

    /// Behaviour when a configured column is absent from the input
    #[serde(default)]
    pub missing_columns: MissingColumnPolicy,

    /// Compute derived behavioral indices before building the matrix
    #[serde(default)]
    pub derive_indices: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            features: Self::default_features(),
            missing_columns: MissingColumnPolicy::default(),
            derive_indices: false,
        }
    }
}

impl FeatureConfig {
    fn default_features() -> Vec<FeatureDefinition> {
        vec![
            FeatureDefinition::new("real_friends", "Accepted friendships"),
            FeatureDefinition::new("active_conversations", "Conversations with recent messages"),
            FeatureDefinition::new("inactivity_days", "Days since last activity"),
            FeatureDefinition::new("mean_engagement", "Weighted likes, comments and shares per post"),
            FeatureDefinition::new("reciprocity_ratio", "Comments received per comment made"),
            FeatureDefinition::new("mean_sentiment", "Mean sentiment of authored content"),
        ]
    }

    /// Ordered feature names
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Validate feature configuration
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(RiskError::config_field(
                "at least one feature is required",
                "features.features",
            ));
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if feature.name.trim().is_empty() {
                return Err(RiskError::config_field(
                    "feature names must not be empty",
                    "features.features",
                ));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(RiskError::config_field(
                    format!("feature '{}' is listed twice", feature.name),
                    "features.features",
                ));
            }
            if !feature.fill_value.is_finite() {
                return Err(RiskError::config_field(
                    format!("fill value for '{}' must be finite", feature.name),
                    "features.features",
                ));
            }
        }

        Ok(())
    }
}

/// Main configuration for the risk engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// Seed handed to every stochastic component of a run
    #[serde(default = "RiskEngineConfig::default_seed")]
    pub seed: u64,

    /// Feature schema
    #[serde(default)]
    pub features: FeatureConfig,

    /// Estimator parameters and policies
    #[serde(default)]
    pub estimators: EstimatorSuiteConfig,

    /// Policy used to pick the risk partition of partitioning estimators
    #[serde(default)]
    pub risk_partition: RiskPartitionPolicy,

    /// Aggregation policies
    #[serde(default)]
    pub ensemble: EnsembleConfig,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            seed: Self::default_seed(),
            features: FeatureConfig::default(),
            estimators: EstimatorSuiteConfig::default(),
            risk_partition: RiskPartitionPolicy::default(),
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl RiskEngineConfig {
    const fn default_seed() -> u64 {
        42
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RiskError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(Into::into)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            RiskError::io(format!("Failed to write config file: {}", path.display()), e)
        })
    }

    /// Validate the whole configuration tree
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.estimators.validate()?;

        if self.estimators.enabled_kinds().is_empty() {
            return Err(RiskError::config_field(
                "at least one estimator must be enabled",
                "estimators",
            ));
        }

        if let RiskPartitionPolicy::FeatureMean { feature } = &self.risk_partition {
            if !self.features.features.iter().any(|f| &f.name == feature) {
                return Err(RiskError::config_field(
                    format!("risk partition feature '{feature}' is not a configured feature"),
                    "risk_partition.feature",
                ));
            }
        }

        self.ensemble.validate(&self.estimators)
    }
}

#[cfg(test)]
mod tests;
