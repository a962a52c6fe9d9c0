//! Feature definitions, the per-user feature table and the standardized
//! feature matrix consumed by every estimator.
//!
//! Row order of a [`FeatureMatrix`] is the authoritative user order for the
//! rest of the run: estimator outputs, normalized scores and assessments are
//! all aligned to it by index.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{de, Deserialize, Deserializer, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::core::config::FeatureConfig;
use crate::core::derived;
use crate::core::errors::{DegenerateInputWarning, DegenerateKind, Result, ResultExt, RiskError};

/// Unique identifier for users in the system
pub type UserId = String;

/// Standard deviations below this are treated as a constant column
const CONSTANT_STD_DEV: f64 = 1e-12;

/// Definition of one behavioral feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureDefinition {
    /// Column name in the input table
    pub name: String,

    /// Human-readable description of what this feature measures
    #[serde(default)]
    pub description: String,

    /// Value used when a user's entry is missing or not finite
    #[serde(default)]
    pub fill_value: f64,

    /// Minimum accepted value; lower inputs are clamped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    /// Maximum accepted value; higher inputs are clamped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl FeatureDefinition {
    /// Create a new feature definition
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fill_value: 0.0,
            min_value: None,
            max_value: None,
        }
    }

    /// Set the accepted value range for this feature
    pub fn with_range(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = Some(min_value);
        self.max_value = Some(max_value);
        self
    }

    /// Set the fill value for missing entries
    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Check if a value is finite and within the accepted range
    pub fn is_valid_value(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.min_value.map_or(true, |min| value >= min)
            && self.max_value.map_or(true, |max| value <= max)
    }

    /// Resolve one raw entry: missing or non-finite entries take the fill
    /// value, finite ones are clamped to the accepted range
    pub fn resolve(&self, value: Option<f64>) -> (f64, bool) {
        match value {
            Some(v) if v.is_finite() => {
                let mut clamped = v;
                if let Some(min) = self.min_value {
                    clamped = clamped.max(min);
                }
                if let Some(max) = self.max_value {
                    clamped = clamped.min(max);
                }
                (clamped, false)
            }
            _ => (self.fill_value, true),
        }
    }
}

/// Behaviour when a configured feature column is absent from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingColumnPolicy {
    /// Reject the table with a schema error
    Fail,
    /// Drop the feature from the matrix
    Omit,
    /// Fill the column with seeded uniform noise and flag it as synthetic
    #[default]
    Synthesize,
}

/// One user's raw behavioral measurements.
///
/// Numeric and `null` fields become feature values. Any other field (names,
/// flags, nested objects) is kept in `attributes` and never reaches the
/// feature matrix.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserRecord {
    /// Unique user identifier
    pub user_id: UserId,

    /// Raw feature values; `None` marks a missing entry
    #[serde(flatten)]
    pub values: IndexMap<String, Option<f64>>,

    /// Non-numeric fields carried through from the input
    #[serde(flatten)]
    pub attributes: IndexMap<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for UserRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = IndexMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let user_id = match fields.shift_remove("user_id") {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "user_id must be a string or number, got {other}"
                )))
            }
            None => return Err(de::Error::missing_field("user_id")),
        };

        let mut record = UserRecord::new(user_id);
        for (name, value) in fields {
            match value {
                serde_json::Value::Number(number) => {
                    record.values.insert(name, number.as_f64());
                }
                serde_json::Value::Null => {
                    record.values.insert(name, None);
                }
                other => {
                    record.attributes.insert(name, other);
                }
            }
        }
        Ok(record)
    }
}

impl UserRecord {
    /// Create a record with no values
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            values: IndexMap::new(),
            attributes: IndexMap::new(),
        }
    }

    /// Builder-style setter
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), Some(value));
        self
    }

    /// Record an explicitly missing entry
    pub fn with_missing(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into(), None);
        self
    }

    /// Set a value in place
    pub fn set(&mut self, name: impl Into<String>, value: Option<f64>) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Finite value for a column, if present
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .get(name)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    /// Value for a column with missing entries read as zero
    pub fn get_or_zero(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }
}

/// Tabular per-user input, one [`UserRecord`] per user.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct FeatureTable {
    /// Records in input order
    pub rows: Vec<UserRecord>,
}

impl FeatureTable {
    /// Wrap a set of records
    pub fn new(rows: Vec<UserRecord>) -> Self {
        Self { rows }
    }

    /// Parse a JSON array of records
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("feature table must be a JSON array of user records")
    }

    /// Load a JSON array of records from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RiskError::io(format!("Failed to read feature table: {}", path.display()), e)
        })?;
        Self::from_json_str(&content)
    }

    /// Number of users
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no users
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any record carries the column, even as a missing entry
    pub fn has_column(&self, name: &str) -> bool {
        self.rows.iter().any(|r| r.values.contains_key(name))
    }

    /// Union of column names in first-seen order
    pub fn columns(&self) -> Vec<String> {
        let mut seen = IndexMap::new();
        for row in &self.rows {
            for name in row.values.keys() {
                seen.entry(name.clone()).or_insert(());
            }
        }
        seen.into_keys().collect()
    }

    fn check_user_ids(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if row.user_id.trim().is_empty() {
                return Err(RiskError::schema("user_id must not be empty"));
            }
            if !seen.insert(row.user_id.as_str()) {
                return Err(RiskError::schema(format!(
                    "user_id '{}' appears more than once",
                    row.user_id
                )));
            }
        }
        Ok(())
    }
}

/// Standardization parameters for one feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureScaling {
    /// Column mean
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Constant columns standardize to zero
    pub constant: bool,
}

impl FeatureScaling {
    /// Standardize one value
    pub fn apply(&self, value: f64) -> f64 {
        if self.constant {
            0.0
        } else {
            (value - self.mean) / self.std_dev
        }
    }
}

/// Scaling parameters for every feature of a matrix, kept so new
/// observations can be transformed consistently.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScalingParams {
    /// Per-feature parameters in matrix column order
    pub features: IndexMap<String, FeatureScaling>,
}

impl ScalingParams {
    /// Standardize one value of a named feature
    pub fn transform_value(&self, feature: &str, value: f64) -> Option<f64> {
        self.features.get(feature).map(|s| s.apply(value))
    }

    /// Standardize a full record into matrix column order
    pub fn transform_record(&self, record: &UserRecord) -> Result<Vec<f64>> {
        self.features
            .iter()
            .map(|(name, scaling)| {
                record.get(name).map(|v| scaling.apply(v)).ok_or_else(|| {
                    RiskError::schema_feature(
                        format!("user '{}' has no value for '{name}'", record.user_id),
                        name.clone(),
                    )
                })
            })
            .collect()
    }
}

/// Numeric users x features matrix, standardized per column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMatrix {
    /// Row order of the matrix
    pub user_ids: Vec<UserId>,

    /// Column order of the matrix
    pub feature_names: Vec<String>,

    /// Standardized values; the estimators' input
    pub values: Array2<f64>,

    /// Filled values before standardization
    pub raw: Array2<f64>,
}

impl FeatureMatrix {
    /// Number of users
    pub fn n_users(&self) -> usize {
        self.values.nrows()
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Borrow the standardized matrix
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    fn column_index(&self, feature: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == feature)
    }

    /// Standardized column of a feature
    pub fn column(&self, feature: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(feature)
            .map(|i| self.values.index_axis(Axis(1), i))
    }

    /// Unstandardized column of a feature
    pub fn raw_column(&self, feature: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(feature).map(|i| self.raw.index_axis(Axis(1), i))
    }

    /// Row index of a user
    pub fn row_of(&self, user_id: &str) -> Option<usize> {
        self.user_ids.iter().position(|u| u == user_id)
    }
}

/// What the builder had to do to the input.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildReport {
    /// Configured features absent from the input and dropped
    pub omitted_features: Vec<String>,
    /// Configured features absent from the input and synthesized
    pub synthetic_features: Vec<String>,
    /// Features with zero variance
    pub constant_features: Vec<String>,
    /// Entries replaced by their fill value
    pub filled_values: usize,
    /// Degenerate-input warnings raised while building
    pub warnings: Vec<DegenerateInputWarning>,
}

impl BuildReport {
    /// Whether any column was synthesized
    pub fn has_synthetic_data(&self) -> bool {
        !self.synthetic_features.is_empty()
    }
}

/// Output of [`FeatureMatrixBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltMatrix {
    /// The standardized matrix
    pub matrix: FeatureMatrix,
    /// Standardization parameters
    pub scaling: ScalingParams,
    /// Build diagnostics
    pub report: BuildReport,
}

/// Turns a [`FeatureTable`] into a [`FeatureMatrix`].
#[derive(Debug, Clone)]
pub struct FeatureMatrixBuilder {
    config: FeatureConfig,
    seed: u64,
}

impl FeatureMatrixBuilder {
    /// Create a builder for a feature schema
    pub fn new(config: &FeatureConfig, seed: u64) -> Self {
        Self {
            config: config.clone(),
            seed,
        }
    }

    /// Build the standardized matrix
    pub fn build(&self, table: &FeatureTable) -> Result<BuiltMatrix> {
        if table.is_empty() {
            return Err(RiskError::schema("feature table has no users"));
        }
        table.check_user_ids()?;

        let derived_table;
        let table = if self.config.derive_indices {
            derived_table = derived::with_derived_indices(table);
            &derived_table
        } else {
            table
        };

        let n = table.len();
        let mut report = BuildReport::default();
        let mut columns: Vec<(String, Vec<f64>)> = Vec::with_capacity(self.config.features.len());

        for (index, feature) in self.config.features.iter().enumerate() {
            if let Some(row) = table.rows.iter().find(|r| r.attributes.contains_key(&feature.name)) {
                return Err(RiskError::schema_feature(
                    format!(
                        "feature '{}' of user '{}' is not numeric",
                        feature.name, row.user_id
                    ),
                    feature.name.clone(),
                ));
            }
            if table.has_column(&feature.name) {
                let column = table
                    .rows
                    .iter()
                    .map(|row| {
                        let (value, filled) = feature.resolve(row.values.get(&feature.name).copied().flatten());
                        report.filled_values += usize::from(filled);
                        value
                    })
                    .collect();
                columns.push((feature.name.clone(), column));
                continue;
            }

            match self.config.missing_columns {
                MissingColumnPolicy::Fail => {
                    return Err(RiskError::schema_feature(
                        format!("required feature '{}' is missing from the input", feature.name),
                        feature.name.clone(),
                    ));
                }
                MissingColumnPolicy::Omit => {
                    debug!(feature = %feature.name, "omitting absent feature");
                    report.omitted_features.push(feature.name.clone());
                }
                MissingColumnPolicy::Synthesize => {
                    let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(index as u64));
                    let column = (0..n).map(|_| rng.gen::<f64>()).collect();
                    report.warnings.push(DegenerateInputWarning::emit(
                        DegenerateKind::SyntheticFeature {
                            feature: feature.name.clone(),
                        },
                        format!(
                            "feature '{}' is absent from the input; filled with synthetic values",
                            feature.name
                        ),
                    ));
                    report.synthetic_features.push(feature.name.clone());
                    columns.push((feature.name.clone(), column));
                }
            }
        }

        if columns.is_empty() {
            return Err(RiskError::schema(
                "none of the configured features are present in the input",
            ));
        }

        let n_features = columns.len();
        let mut raw = Array2::<f64>::zeros((n, n_features));
        let mut values = Array2::<f64>::zeros((n, n_features));
        let mut scaling = ScalingParams::default();

        for (j, (name, column)) in columns.iter().enumerate() {
            let mean = column.iter().mean();
            let std_dev = column.iter().population_std_dev();
            let constant = !(std_dev.is_finite() && std_dev > CONSTANT_STD_DEV * mean.abs().max(1.0));
            if constant {
                report.warnings.push(DegenerateInputWarning::emit(
                    DegenerateKind::ConstantFeature {
                        feature: name.clone(),
                    },
                    format!("feature '{name}' has zero variance; standardized to 0"),
                ));
                report.constant_features.push(name.clone());
            }

            let params = FeatureScaling {
                mean,
                std_dev,
                constant,
            };
            for (i, &v) in column.iter().enumerate() {
                raw[[i, j]] = v;
                values[[i, j]] = params.apply(v);
            }
            scaling.features.insert(name.clone(), params);
        }

        info!(
            users = n,
            features = n_features,
            omitted = report.omitted_features.len(),
            synthetic = report.synthetic_features.len(),
            filled = report.filled_values,
            "feature matrix built"
        );

        Ok(BuiltMatrix {
            matrix: FeatureMatrix {
                user_ids: table.rows.iter().map(|r| r.user_id.clone()).collect(),
                feature_names: columns.into_iter().map(|(name, _)| name).collect(),
                values,
                raw,
            },
            scaling,
            report,
        })
    }
}

#[cfg(test)]
#[path = "featureset_tests.rs"]
mod tests;
