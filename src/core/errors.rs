//! Error types for the aura-risk library.
//!
//! Every fallible operation returns [`Result`]. Errors are structured so that
//! callers can tell a malformed input table apart from a misconfigured engine
//! or a single estimator that failed to fit. Degenerate inputs are not errors:
//! they surface as [`DegenerateInputWarning`] values that are logged and kept in
//! the run metadata.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main result type for aura-risk operations.
pub type Result<T> = std::result::Result<T, RiskError>;

/// Error type for all aura-risk operations.
#[derive(Error, Debug)]
pub enum RiskError {
    /// Missing or empty input data
    #[error("Schema error: {message}")]
    Schema {
        /// Error description
        message: String,
        /// Feature column involved, if any
        feature: Option<String>,
    },

    /// A specific estimator failed to converge or fit
    #[error("Estimator '{estimator}' failed: {message}")]
    EstimatorFit {
        /// Name of the estimator that failed
        estimator: String,
        /// Error description
        message: String,
    },

    /// Invalid weights, thresholds or ranges
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// A pipeline stage could not produce its output
    #[error("Pipeline error at stage '{stage}': {message}")]
    Pipeline {
        /// Pipeline stage where the error occurred
        stage: String,
        /// Error description
        message: String,
    },

    /// I/O related errors
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data format being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl RiskError {
    /// Create a new schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            feature: None,
        }
    }

    /// Create a new schema error naming the offending feature
    pub fn schema_feature(message: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            feature: Some(feature.into()),
        }
    }

    /// Create a new estimator fit error
    pub fn estimator_fit(estimator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EstimatorFit {
            estimator: estimator.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new pipeline error
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Name of the estimator this error is attributed to, if any
    pub fn estimator(&self) -> Option<&str> {
        match self {
            Self::EstimatorFit { estimator, .. } => Some(estimator),
            _ => None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            Self::Schema { message, .. }
            | Self::EstimatorFit { message, .. }
            | Self::Config { message, .. }
            | Self::Pipeline { message, .. }
            | Self::Io { message, .. }
            | Self::Serialization { message, .. } => {
                *message = format!("{}: {message}", context.into());
            }
        }
        self
    }
}

impl From<io::Error> for RiskError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for RiskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for RiskError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add lazily built context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<RiskError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

/// Category of a degenerate-input condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegenerateKind {
    /// A feature column has zero variance and was scaled to all zeros
    ConstantFeature {
        /// Feature name
        feature: String,
    },
    /// Every user received the same raw score from one estimator
    ConstantScores {
        /// Estimator name
        estimator: String,
    },
    /// A required column was missing and filled with synthetic values
    SyntheticFeature {
        /// Feature name
        feature: String,
    },
    /// A partition received no members
    EmptyPartition {
        /// Estimator name
        estimator: String,
        /// Partition id
        partition: usize,
    },
    /// An outlier-capable estimator flagged nobody
    NoOutliersFlagged {
        /// Estimator name
        estimator: String,
    },
}

/// Non-fatal condition that triggered a safe default during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegenerateInputWarning {
    /// What was degenerate
    #[serde(flatten)]
    pub kind: DegenerateKind,
    /// Human-readable explanation including the default that was applied
    pub message: String,
}

impl DegenerateInputWarning {
    /// Create a warning and emit it through `tracing`
    pub fn emit(kind: DegenerateKind, message: impl Into<String>) -> Self {
        let warning = Self {
            kind,
            message: message.into(),
        };
        tracing::warn!(target: "aura_risk::degenerate", "{}", warning);
        warning
    }
}

impl fmt::Display for DegenerateInputWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DegenerateKind::ConstantFeature { feature } => {
                write!(f, "constant feature '{feature}': {}", self.message)
            }
            DegenerateKind::ConstantScores { estimator } => {
                write!(f, "constant scores from '{estimator}': {}", self.message)
            }
            DegenerateKind::SyntheticFeature { feature } => {
                write!(f, "synthetic feature '{feature}': {}", self.message)
            }
            DegenerateKind::EmptyPartition {
                estimator,
                partition,
            } => write!(
                f,
                "empty partition {partition} in '{estimator}': {}",
                self.message
            ),
            DegenerateKind::NoOutliersFlagged { estimator } => {
                write!(f, "no outliers from '{estimator}': {}", self.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RiskError::config("Invalid configuration");
        assert!(matches!(err, RiskError::Config { .. }));

        let err = RiskError::schema("no rows");
        assert!(matches!(err, RiskError::Schema { .. }));
    }

    #[test]
    fn test_estimator_fit_carries_name() {
        let err = RiskError::estimator_fit("mixture", "singular covariance");
        assert_eq!(err.estimator(), Some("mixture"));

        let display = format!("{err}");
        assert!(display.contains("mixture"));
        assert!(display.contains("singular covariance"));
    }

    #[test]
    fn test_config_field_error() {
        let err = RiskError::config_field("Invalid value", "ensemble.severity.weights");

        if let RiskError::Config { message, field } = err {
            assert_eq!(message, "Invalid value");
            assert_eq!(field, Some("ensemble.severity.weights".to_string()));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_with_context_internal_error() {
        let err = RiskError::internal("Something went wrong").with_context("During aggregation");

        if let RiskError::Internal { context, .. } = err {
            assert_eq!(context, Some("During aggregation".to_string()));
        } else {
            panic!("Expected Internal error");
        }
    }

    #[test]
    fn test_with_context_prefixes_estimator_message() {
        let err = RiskError::estimator_fit("density", "no neighbours").with_context("fit");
        if let RiskError::EstimatorFit { message, .. } = err {
            assert_eq!(message, "fit: no neighbours");
        } else {
            panic!("Expected EstimatorFit error");
        }
    }

    #[test]
    fn test_result_extension() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));

        let risk_result = result.context("Failed to read feature table");
        assert!(matches!(risk_result, Err(RiskError::Io { .. })));
    }

    #[test]
    fn test_with_context_prefixes_serialization_message() {
        let result = serde_json::from_str::<Vec<i32>>("{").map_err(RiskError::from);
        let err = result.with_context(|| "feature table".to_string()).unwrap_err();
        assert!(matches!(err, RiskError::Serialization { .. }));
        assert!(err.to_string().starts_with("Serialization error: feature table: "));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let risk_err: RiskError = json_err.into();

        if let RiskError::Serialization { data_type, .. } = risk_err {
            assert_eq!(data_type, Some("JSON".to_string()));
        } else {
            panic!("Expected Serialization error");
        }
    }

    #[test]
    fn test_degenerate_warning_display() {
        let warning = DegenerateInputWarning::emit(
            DegenerateKind::ConstantFeature {
                feature: "real_friends".to_string(),
            },
            "scaled to zero",
        );
        let display = warning.to_string();
        assert!(display.contains("real_friends"));
        assert!(display.contains("scaled to zero"));
    }
}
