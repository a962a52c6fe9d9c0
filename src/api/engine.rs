//! Main risk engine implementation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::api::results::ScoringRun;
use crate::core::config::RiskEngineConfig;
use crate::core::errors::Result;
use crate::core::featureset::FeatureTable;
use crate::core::pipeline::ScoringPipeline;
use crate::estimators::{Estimator, EstimatorKind};

/// Main aura-risk scoring engine
pub struct RiskEngine {
    /// Internal scoring pipeline
    pipeline: ScoringPipeline,

    /// Engine configuration
    config: Arc<RiskEngineConfig>,
}

impl RiskEngine {
    /// Create an engine; the configuration is validated here, before any run
    pub fn new(config: RiskEngineConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pipeline = ScoringPipeline::new(Arc::clone(&config));

        info!(
            seed = config.seed,
            estimators = ?config.estimators.enabled_kinds(),
            "risk engine initialized"
        );
        Ok(Self { pipeline, config })
    }

    /// Swap in another implementation for an estimator slot.
    ///
    /// The factory receives the slot's derived seed and is called once per run.
    pub fn with_estimator<F>(mut self, kind: EstimatorKind, factory: F) -> Self
    where
        F: Fn(u64) -> Box<dyn Estimator> + Send + Sync + 'static,
    {
        self.pipeline.register(kind, Arc::new(factory));
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &RiskEngineConfig {
        &self.config
    }

    /// Score every user of a feature table
    pub async fn score(&self, table: &FeatureTable) -> Result<ScoringRun> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();
        let span = info_span!("scoring_run", %run_id, users = table.len());

        let output = self.pipeline.run(table).instrument(span.clone()).await?;
        let run = ScoringRun::from_pipeline_output(
            output,
            run_id,
            started_at,
            timer.elapsed(),
            self.config.seed,
        );

        span.in_scope(|| {
            info!(
                duration_ms = run.metadata.duration_ms,
                failures = run.metadata.failures.len(),
                synthetic_data = run.has_synthetic_data(),
                "scoring run completed"
            );
        });
        Ok(run)
    }
}
