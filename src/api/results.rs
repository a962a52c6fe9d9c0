//! Scoring results and run metadata for public API consumption.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::adapters::EstimatorResult;
use crate::core::ensemble::{RiskAssessment, RiskTier, SeverityPlan, VotePlan};
use crate::core::errors::DegenerateInputWarning;
use crate::core::featureset::{ScalingParams, UserId};
use crate::core::normalization::EstimatorSignal;
use crate::core::pipeline::{EstimatorFailure, PipelineOutput};
use crate::core::risk_partition::PartitionRiskMap;
use crate::estimators::EstimatorKind;
use crate::io::reports::RiskReport;

/// Provenance and diagnostics of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Total processing time in milliseconds
    pub duration_ms: f64,

    /// Seed used by every stochastic component
    pub seed: u64,

    /// Number of users scored
    pub n_users: usize,

    /// Matrix columns, in order
    pub feature_names: Vec<String>,

    /// Estimators whose output was aggregated
    pub contributing: Vec<EstimatorKind>,

    /// Estimators excluded by their failure policy
    pub failures: Vec<EstimatorFailure>,

    /// Wall-clock time per estimator, in milliseconds
    pub estimator_durations_ms: IndexMap<EstimatorKind, f64>,

    /// Configured features dropped because they were absent
    pub omitted_features: Vec<String>,

    /// Configured features filled with synthetic values
    pub synthetic_features: Vec<String>,

    /// Features with zero variance
    pub constant_features: Vec<String>,

    /// Missing entries replaced by fill values
    pub filled_values: usize,

    /// Risk partition identified per partitioning estimator
    pub risk_partitions: IndexMap<EstimatorKind, PartitionRiskMap>,

    /// Vote thresholds actually applied
    pub vote_plan: VotePlan,

    /// Severity weights actually applied
    pub severity_plan: SeverityPlan,

    /// Degenerate-input conditions and the defaults applied
    pub warnings: Vec<DegenerateInputWarning>,
}

impl RunMetadata {
    /// Whether any part of the result rests on synthesized input
    pub fn has_synthetic_data(&self) -> bool {
        !self.synthetic_features.is_empty()
    }

    /// Estimators whose worker thread was still running when the run ended
    pub fn abandoned_workers(&self) -> Vec<EstimatorKind> {
        self.failures
            .iter()
            .filter(|f| f.worker_abandoned)
            .map(|f| f.estimator)
            .collect()
    }
}

/// One estimator's contribution to a result row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatorDetail {
    /// Assigned partition
    pub partition_id: Option<usize>,
    /// Outlier flag
    pub is_outlier: bool,
    /// Raw score, larger means more anomalous
    pub raw_score: Option<f64>,
    /// Normalized risk signal
    pub normalized_score: f64,
    /// Whether the estimator flagged the user
    pub flagged: bool,
    /// Tier of the assigned partition by risk rank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_tier: Option<RiskTier>,
}

/// Flat per-user row of the result table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRow {
    /// User identifier
    pub user_id: UserId,
    /// Vote-derived tier
    pub risk_tier: RiskTier,
    /// Severity on the configured scale
    pub severity_index: f64,
    /// Severity-derived tier
    pub severity_tier: RiskTier,
    /// Number of voters flagging the user
    pub vote_count: usize,
    /// Number of voters the count is out of
    pub vote_denominator: usize,
    /// Per-estimator diagnostics
    pub estimators: IndexMap<EstimatorKind, EstimatorDetail>,
}

/// Complete outcome of one scoring run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRun {
    /// Provenance and diagnostics
    pub metadata: RunMetadata,

    /// One assessment per user, in input order
    pub assessments: Vec<RiskAssessment>,

    /// Adapted output of each contributing estimator
    pub estimators: IndexMap<EstimatorKind, EstimatorResult>,

    /// Normalized risk signal of each contributing estimator
    pub signals: IndexMap<EstimatorKind, EstimatorSignal>,

    /// Standardization parameters of the feature matrix
    pub scaling: ScalingParams,
}

impl ScoringRun {
    /// Shape pipeline output for the public API
    pub fn from_pipeline_output(
        output: PipelineOutput,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        seed: u64,
    ) -> Self {
        let metadata = RunMetadata {
            run_id,
            started_at,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            seed,
            n_users: output.assessments.len(),
            feature_names: output.matrix.feature_names.clone(),
            contributing: output.results.keys().copied().collect(),
            failures: output.failures,
            estimator_durations_ms: output.estimator_durations_ms,
            omitted_features: output.build_report.omitted_features,
            synthetic_features: output.build_report.synthetic_features,
            constant_features: output.build_report.constant_features,
            filled_values: output.build_report.filled_values,
            risk_partitions: output.risk_maps,
            vote_plan: output.vote_plan,
            severity_plan: output.severity_plan,
            warnings: output.warnings,
        };

        Self {
            metadata,
            assessments: output.assessments,
            estimators: output.results,
            signals: output.signals,
            scaling: output.scaling,
        }
    }

    /// Assessment of a single user
    pub fn assessment(&self, user_id: &str) -> Option<&RiskAssessment> {
        self.assessments.iter().find(|a| a.user_id == user_id)
    }

    /// Whether any part of the result rests on synthesized input
    pub fn has_synthetic_data(&self) -> bool {
        self.metadata.has_synthetic_data()
    }

    /// Reporting view over the assessments
    pub fn report(&self) -> RiskReport<'_> {
        RiskReport::new(&self.assessments, self.has_synthetic_data())
    }

    /// Flat result table, one row per user in input order
    pub fn rows(&self) -> Vec<ResultRow> {
        self.assessments
            .iter()
            .enumerate()
            .map(|(i, assessment)| {
                let estimators = self
                    .estimators
                    .iter()
                    .filter_map(|(kind, result)| {
                        let record = result.records.get(i)?;
                        let partition_tier = record.partition_id.and_then(|p| {
                            self.metadata
                                .risk_partitions
                                .get(kind)
                                .and_then(|map| map.partition_tier(p))
                        });
                        let detail = EstimatorDetail {
                            partition_id: record.partition_id,
                            is_outlier: record.is_outlier,
                            raw_score: record.raw_score,
                            normalized_score: self
                                .signals
                                .get(kind)
                                .and_then(|s| s.normalized.values.get(i).copied())
                                .unwrap_or(0.0),
                            flagged: assessment.flagged_by.contains(kind),
                            partition_tier,
                        };
                        Some((*kind, detail))
                    })
                    .collect();

                ResultRow {
                    user_id: assessment.user_id.clone(),
                    risk_tier: assessment.risk_tier,
                    severity_index: assessment.severity_index,
                    severity_tier: assessment.severity_tier,
                    vote_count: assessment.vote_count,
                    vote_denominator: assessment.vote_denominator,
                    estimators,
                }
            })
            .collect()
    }
}
