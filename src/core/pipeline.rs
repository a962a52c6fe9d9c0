//! Scoring pipeline that orchestrates one run end to end.
//!
//! Stages, in order:
//! 1. build the standardized feature matrix
//! 2. run every enabled estimator concurrently, each on its own detached
//!    worker thread with its own timeout, over a shared read-only matrix
//! 3. apply failure policies and collect the contributing estimators
//! 4. identify risk partitions, extract and normalize risk signals
//! 5. aggregate votes and severity into per-user assessments
//!
//! Estimators share no mutable state, so concurrent scheduling cannot change
//! the outcome: given a seed, results are identical to a sequential run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Span};

use crate::core::adapters::{EstimatorAdapter, EstimatorResult};
use crate::core::config::{FailurePolicy, RiskEngineConfig};
use crate::core::ensemble::{
    vote_flags, EnsembleAggregator, EnsembleInputs, RiskAssessment, SeverityPlan, VotePlan,
};
use crate::core::errors::{DegenerateInputWarning, Result, ResultExt, RiskError};
use crate::core::featureset::{BuildReport, FeatureMatrix, FeatureMatrixBuilder, FeatureTable, ScalingParams};
use crate::core::normalization::{normalize_signal, EstimatorSignal};
use crate::core::risk_partition::{identify_risk_partition, PartitionRiskMap};
use crate::estimators::{builtin_factory, EstimatorFactory, EstimatorKind};

/// Why an estimator did not contribute to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatorFailure {
    /// Estimator that failed
    pub estimator: EstimatorKind,
    /// Failure description
    pub message: String,
    /// Whether the failure was a timeout
    pub timed_out: bool,
    /// Whether the worker thread was left running when the run moved on
    #[serde(default)]
    pub worker_abandoned: bool,
    /// Policy that was applied
    pub policy: FailurePolicy,
}

/// Outcome of one estimator task
enum TaskOutcome {
    Completed(EstimatorResult),
    Failed { error: RiskError, timed_out: bool },
}

/// Everything a run produced, before it is shaped for the public API.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Standardized matrix the estimators saw
    pub matrix: FeatureMatrix,
    /// Standardization parameters
    pub scaling: ScalingParams,
    /// Matrix build diagnostics
    pub build_report: BuildReport,
    /// Adapted output per contributing estimator, in pipeline order
    pub results: IndexMap<EstimatorKind, EstimatorResult>,
    /// Risk partition per contributing partitioning estimator
    pub risk_maps: IndexMap<EstimatorKind, PartitionRiskMap>,
    /// Normalized risk signal per contributing estimator
    pub signals: IndexMap<EstimatorKind, EstimatorSignal>,
    /// Estimators excluded from the run
    pub failures: Vec<EstimatorFailure>,
    /// Wall-clock time per estimator task, in milliseconds
    pub estimator_durations_ms: IndexMap<EstimatorKind, f64>,
    /// Resolved vote thresholds
    pub vote_plan: VotePlan,
    /// Resolved severity weights
    pub severity_plan: SeverityPlan,
    /// One assessment per user, in matrix row order
    pub assessments: Vec<RiskAssessment>,
    /// Every degenerate-input warning of the run
    pub warnings: Vec<DegenerateInputWarning>,
}

/// Runs the scoring stages for a validated configuration.
pub struct ScoringPipeline {
    config: Arc<RiskEngineConfig>,
    factories: IndexMap<EstimatorKind, EstimatorFactory>,
}

impl ScoringPipeline {
    /// Create a pipeline with the built-in estimator for every kind
    pub fn new(config: Arc<RiskEngineConfig>) -> Self {
        let factories = EstimatorKind::ALL
            .into_iter()
            .map(|kind| (kind, builtin_factory(kind, &config.estimators)))
            .collect();
        Self { config, factories }
    }

    /// Replace the implementation used for an estimator slot
    pub fn register(&mut self, kind: EstimatorKind, factory: EstimatorFactory) {
        self.factories.insert(kind, factory);
    }

    /// Configuration the pipeline runs with
    pub fn config(&self) -> &RiskEngineConfig {
        &self.config
    }

    /// Execute one run over a feature table
    pub async fn run(&self, table: &FeatureTable) -> Result<PipelineOutput> {
        let built = FeatureMatrixBuilder::new(&self.config.features, self.config.seed).build(table)?;
        let mut warnings = built.report.warnings.clone();
        let matrix = Arc::new(built.matrix);

        let (results, failures, estimator_durations_ms) =
            self.run_estimators(Arc::clone(&matrix)).await?;
        for result in results.values() {
            warnings.extend(result.warnings.iter().cloned());
        }

        let mut risk_maps = IndexMap::new();
        for (kind, result) in &results {
            if kind.is_partitioning() {
                let (map, partition_warnings) =
                    identify_risk_partition(result, &matrix, &self.config.risk_partition)
                        .with_context(|| format!("risk partition of '{kind}'"))?;
                warnings.extend(partition_warnings);
                risk_maps.insert(*kind, map);
            }
        }

        let mut signals = IndexMap::new();
        let mut inputs = EnsembleInputs::default();
        for (kind, result) in &results {
            let risk_map = risk_maps.get(kind);
            let (signal, warning) = normalize_signal(result, risk_map)?;
            warnings.extend(warning);
            inputs.flags.insert(*kind, vote_flags(result, risk_map));
            inputs.normalized.insert(*kind, signal.normalized.values.clone());
            signals.insert(*kind, signal);
        }

        let contributing: Vec<EstimatorKind> = results.keys().copied().collect();
        let vote_plan = VotePlan::resolve(&self.config.ensemble.voting, &contributing);
        let severity_plan = SeverityPlan::resolve(&self.config.ensemble.severity, &contributing)?;
        let aggregator = EnsembleAggregator::new(vote_plan.clone(), severity_plan.clone());
        let assessments = aggregator.aggregate(&matrix.user_ids, &inputs)?;

        info!(
            users = assessments.len(),
            contributing = contributing.len(),
            excluded = failures.len(),
            warnings = warnings.len(),
            "ensemble aggregation complete"
        );

        let matrix = Arc::try_unwrap(matrix).unwrap_or_else(|shared| (*shared).clone());
        Ok(PipelineOutput {
            matrix,
            scaling: built.scaling,
            build_report: built.report,
            results,
            risk_maps,
            signals,
            failures,
            estimator_durations_ms,
            vote_plan,
            severity_plan,
            assessments,
            warnings,
        })
    }

    /// Run enabled estimators concurrently and apply their failure policies.
    ///
    /// The first fatal failure, in pipeline order, aborts the run. Workers are
    /// plain detached threads rather than runtime blocking tasks, so a
    /// timed-out estimator never delays runtime shutdown; its late result is
    /// dropped with the closed channel.
    async fn run_estimators(
        &self,
        matrix: Arc<FeatureMatrix>,
    ) -> Result<(
        IndexMap<EstimatorKind, EstimatorResult>,
        Vec<EstimatorFailure>,
        IndexMap<EstimatorKind, f64>,
    )> {
        let enabled = self.config.estimators.enabled_kinds();
        let tasks = enabled.iter().map(|&kind| {
            let settings = self.config.estimators.run_settings(kind).clone();
            let factory = self.factories.get(&kind).cloned();
            let matrix = Arc::clone(&matrix);
            let seed = kind.derive_seed(self.config.seed);

            async move {
                let started = Instant::now();
                let Some(factory) = factory else {
                    let error = RiskError::internal(format!("no implementation registered for '{kind}'"));
                    return (kind, settings, TaskOutcome::Failed { error, timed_out: false }, 0.0);
                };

                let (sender, receiver) = oneshot::channel();
                let span = Span::current();
                let spawned = std::thread::Builder::new()
                    .name(format!("aura-{kind}"))
                    .spawn(move || {
                        let _entered = span.enter();
                        let result = EstimatorAdapter::new(kind, factory(seed)).run(&matrix);
                        // The receiver is gone once the run stopped waiting
                        let _ = sender.send(result);
                    });
                if let Err(source) = spawned {
                    let error = RiskError::io(format!("failed to start worker for '{kind}'"), source);
                    return (kind, settings, TaskOutcome::Failed { error, timed_out: false }, 0.0);
                }

                let budget = Duration::from_millis(settings.timeout_ms);
                let outcome = match tokio::time::timeout(budget, receiver).await {
                    Ok(Ok(Ok(result))) => TaskOutcome::Completed(result),
                    Ok(Ok(Err(error))) => TaskOutcome::Failed {
                        error,
                        timed_out: false,
                    },
                    Ok(Err(_)) => TaskOutcome::Failed {
                        error: RiskError::estimator_fit(
                            kind.as_str(),
                            "estimator worker stopped without a result",
                        ),
                        timed_out: false,
                    },
                    Err(_) => TaskOutcome::Failed {
                        error: RiskError::estimator_fit(
                            kind.as_str(),
                            format!("timed out after {} ms", settings.timeout_ms),
                        ),
                        timed_out: true,
                    },
                };
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                (kind, settings, outcome, elapsed_ms)
            }
        });

        let mut results = IndexMap::new();
        let mut failures = Vec::new();
        let mut durations = IndexMap::new();

        for (kind, settings, outcome, elapsed_ms) in future::join_all(tasks).await {
            durations.insert(kind, elapsed_ms);
            match outcome {
                TaskOutcome::Completed(result) => {
                    debug!(estimator = %kind, elapsed_ms, "estimator finished");
                    results.insert(kind, result);
                }
                TaskOutcome::Failed { error, timed_out } => match settings.failure_policy {
                    FailurePolicy::Fatal => {
                        error!(estimator = %kind, timed_out, "fatal estimator failure: {error}");
                        return Err(error);
                    }
                    FailurePolicy::Exclude => {
                        warn!(estimator = %kind, timed_out, "excluding estimator: {error}");
                        if timed_out {
                            warn!(estimator = %kind, "abandoning worker thread of timed-out estimator");
                        }
                        failures.push(EstimatorFailure {
                            estimator: kind,
                            message: error.to_string(),
                            timed_out,
                            worker_abandoned: timed_out,
                            policy: FailurePolicy::Exclude,
                        });
                    }
                },
            }
        }

        if results.is_empty() {
            return Err(RiskError::pipeline(
                "estimators",
                format!("all {} enabled estimators failed", enabled.len()),
            ));
        }

        Ok((results, failures, durations))
    }
}
