//! CLI argument definitions and command structures.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use aura_risk::io::reports::ExportFormat;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ensemble risk scoring over user behavioral features
#[derive(Parser)]
#[command(name = "aura-risk")]
#[command(version = VERSION)]
#[command(about = "Ensemble risk scoring with clustering and anomaly detectors")]
#[command(long_about = "
Score every user of a feature table with four unsupervised estimators
(k-means, DBSCAN, Gaussian mixture, isolation forest) and combine them into a
vote-derived risk tier and a weighted severity index.

Common Usage:

  # Score a JSON feature table with default settings
  aura-risk score users.json

  # Use a custom configuration and write the result table as YAML
  aura-risk score users.json --config risk.yml --out results.yml --format yaml

  # Start from the default configuration
  aura-risk print-default-config > risk.yml
  aura-risk validate-config --config risk.yml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score a feature table
    Score(Box<ScoreArgs>),

    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

/// Output format for the result table
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ExportFormat::Json,
            OutputFormat::Yaml => ExportFormat::Yaml,
        }
    }
}

#[derive(Args)]
pub struct ScoreArgs {
    /// JSON feature table: an array of objects with `user_id` and feature columns
    pub input: PathBuf,

    /// Configuration file (YAML); defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the configured seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the full result table to this file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Format of the written result table
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Number of highest-severity users to print
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Only print users in this risk tier (low, moderate, high, critical)
    #[arg(long)]
    pub tier: Option<String>,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Path to configuration file to validate
    #[arg(short, long, required = true)]
    pub config: PathBuf,
}
