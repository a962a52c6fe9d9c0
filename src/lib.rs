//! # aura-risk: Ensemble Risk Scoring Engine
//!
//! Scores users by combining several unsupervised estimators over a shared,
//! standardized feature matrix:
//!
//! - **Partitioning**: k-means and a Gaussian mixture, whose arbitrary
//!   partition ids are reinterpreted every run to find the risk partition
//! - **Outlier detection**: DBSCAN noise points and isolation-forest anomalies
//! - **Aggregation**: a configurable vote over binary flags and a weighted,
//!   bounded severity index over min-max normalized signals
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         API Layer                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Core Pipeline        │  Estimators       │  I/O             │
//! │                       │                   │                  │
//! │ • Feature matrix      │ • KMeans          │ • Risk report    │
//! │ • Adapters            │ • DBSCAN          │ • JSON/YAML      │
//! │ • Risk partition      │ • GaussianMixture │   export         │
//! │ • Normalization       │ • IsolationForest │                  │
//! │ • Ensemble            │                   │                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aura_risk::{FeatureTable, RiskEngine, RiskEngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RiskEngine::new(RiskEngineConfig::default())?;
//!     let table = FeatureTable::from_json_file("users.json")?;
//!     let run = engine.score(&table).await?;
//!
//!     for assessment in run.report().top(10) {
//!         println!("{} {:.1}", assessment.user_id, assessment.severity_index);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Core scoring pipeline
pub mod core {
    //! Core data model, pipeline stages and configuration.

    pub mod adapters;
    pub mod config;
    pub mod derived;
    pub mod ensemble;
    pub mod errors;
    pub mod featureset;
    pub mod normalization;
    pub mod pipeline;
    pub mod risk_partition;
}

// Estimator implementations
pub mod estimators;

// Reporting and export
pub mod io {
    //! Reporting views and result export.

    pub mod reports;
}

// Public API and engine interface
pub mod api {
    //! High-level API and engine interface.

    pub mod engine;
    pub mod results;
}

// Re-export primary types for convenience
pub use api::engine::RiskEngine;
pub use api::results::{ResultRow, RunMetadata, ScoringRun};
pub use core::config::RiskEngineConfig;
pub use core::ensemble::{RiskAssessment, RiskTier};
pub use core::errors::{DegenerateInputWarning, Result, ResultExt, RiskError};
pub use core::featureset::{FeatureTable, UserRecord};
pub use estimators::{Estimator, EstimatorKind};
pub use io::reports::{ExportFormat, RiskReport};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
