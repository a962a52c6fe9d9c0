//! Read-side reporting over scored assessments, plus result-table export.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::api::results::{ResultRow, RunMetadata, ScoringRun};
use crate::core::ensemble::{RiskAssessment, RiskTier};
use crate::core::errors::{Result, ResultExt, RiskError};

/// Ranking and tier summaries over a borrowed set of assessments
#[derive(Debug, Clone, Copy)]
pub struct RiskReport<'a> {
    assessments: &'a [RiskAssessment],
    synthetic_data: bool,
}

impl<'a> RiskReport<'a> {
    /// Wrap assessments; `synthetic_data` marks runs that used synthesized features
    pub fn new(assessments: &'a [RiskAssessment], synthetic_data: bool) -> Self {
        Self {
            assessments,
            synthetic_data,
        }
    }

    /// Whether the underlying run used synthesized features
    pub fn synthetic_data(&self) -> bool {
        self.synthetic_data
    }

    /// Assessments by severity descending, ties by user id ascending
    pub fn ranked(&self) -> Vec<&'a RiskAssessment> {
        let mut ranked: Vec<&RiskAssessment> = self.assessments.iter().collect();
        ranked.sort_by(|a, b| compare_by_severity(a, b));
        ranked
    }

    /// Ranked assessments with the given vote-derived tier
    pub fn filter_tier(&self, tier: RiskTier) -> Vec<&'a RiskAssessment> {
        self.ranked()
            .into_iter()
            .filter(|a| a.risk_tier == tier)
            .collect()
    }

    /// The `n` most severe assessments
    pub fn top(&self, n: usize) -> Vec<&'a RiskAssessment> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    /// Count and share of users per vote-derived tier
    pub fn tier_summary(&self) -> TierSummary {
        let total = self.assessments.len();
        let tiers = RiskTier::ALL
            .into_iter()
            .map(|tier| {
                let count = self
                    .assessments
                    .iter()
                    .filter(|a| a.risk_tier == tier)
                    .count();
                let percentage = if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64 * 100.0
                };
                (tier, TierCount { count, percentage })
            })
            .collect();

        TierSummary {
            total,
            tiers,
            synthetic_data: self.synthetic_data,
        }
    }
}

fn compare_by_severity(a: &RiskAssessment, b: &RiskAssessment) -> Ordering {
    b.severity_index
        .total_cmp(&a.severity_index)
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Users in one tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierCount {
    /// Number of users
    pub count: usize,
    /// Share of all users, 0..=100
    pub percentage: f64,
}

/// Tier distribution of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierSummary {
    /// Number of users
    pub total: usize,
    /// Every tier, lowest first, including empty ones
    pub tiers: IndexMap<RiskTier, TierCount>,
    /// Whether the run used synthesized features
    pub synthetic_data: bool,
}

impl TierSummary {
    /// Count for one tier
    pub fn count(&self, tier: RiskTier) -> usize {
        self.tiers.get(&tier).map_or(0, |t| t.count)
    }
}

impl fmt::Display for TierSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Risk tier distribution ({} users)", self.total)?;
        for (tier, count) in &self.tiers {
            writeln!(
                f,
                "  {:<9} {:>6}  {:>6.2}%",
                tier.as_str(),
                count.count,
                count.percentage
            )?;
        }
        if self.synthetic_data {
            writeln!(f, "  note: synthetic feature values were used in this run")?;
        }
        Ok(())
    }
}

impl fmt::Display for RiskReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tier_summary())
    }
}

/// Serialization format of an exported result table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// YAML
    Yaml,
}

impl FromStr for ExportFormat {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(RiskError::config(format!("unsupported export format '{other}'"))),
        }
    }
}

/// Exported view of a run: metadata followed by the ranked result table
#[derive(Debug, Serialize)]
pub struct ResultTable<'a> {
    /// Run provenance
    pub metadata: &'a RunMetadata,
    /// Tier distribution
    pub summary: TierSummary,
    /// Rows ordered by severity
    pub rows: Vec<ResultRow>,
}

impl<'a> ResultTable<'a> {
    /// Build the export view of a run
    pub fn from_run(run: &'a ScoringRun) -> Self {
        let mut rows = run.rows();
        rows.sort_by(|a, b| {
            b.severity_index
                .total_cmp(&a.severity_index)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Self {
            metadata: &run.metadata,
            summary: run.report().tier_summary(),
            rows,
        }
    }

    /// Render in the requested format
    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ExportFormat::Yaml => Ok(serde_yaml::to_string(self)?),
        }
    }
}

/// Write a run's result table to a file
pub fn write_run(run: &ScoringRun, path: impl AsRef<Path>, format: ExportFormat) -> Result<()> {
    let path = path.as_ref();
    let content = ResultTable::from_run(run)
        .render(format)
        .with_context(|| format!("Failed to render {format:?} results"))?;
    std::fs::write(path, content)
        .map_err(|e| RiskError::io(format!("Failed to write results: {}", path.display()), e))?;
    tracing::info!(path = %path.display(), ?format, "results written");
    Ok(())
}
