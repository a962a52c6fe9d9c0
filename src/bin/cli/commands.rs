//! Command execution logic for the aura-risk CLI.

use std::path::Path;

use owo_colors::OwoColorize;
use tabled::{settings::Style as TableStyle, Table, Tabled};

use aura_risk::core::config::RiskEngineConfig;
use aura_risk::core::ensemble::RiskTier;
use aura_risk::core::featureset::FeatureTable;
use aura_risk::io::reports::write_run;
use aura_risk::{RiskEngine, ScoringRun};

use crate::cli::args::{ScoreArgs, ValidateConfigArgs};

/// Row used when printing the most severe users.
#[derive(Tabled)]
struct TopRow {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Severity tier")]
    severity_tier: String,
    #[tabled(rename = "Votes")]
    votes: String,
    #[tabled(rename = "Risk tier")]
    risk_tier: String,
}

/// Load configuration from a file, or fall back to defaults
fn load_configuration(path: Option<&Path>) -> anyhow::Result<RiskEngineConfig> {
    let config = match path {
        Some(path) => RiskEngineConfig::from_yaml_file(path)?,
        None => RiskEngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Score a feature table and print a ranked summary
pub async fn score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let mut config = load_configuration(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let tier_filter = args.tier.as_deref().map(str::parse::<RiskTier>).transpose()?;

    let table = FeatureTable::from_json_file(&args.input)?;
    let engine = RiskEngine::new(config)?;
    let run = engine.score(&table).await?;

    display_run(&run, args.top, tier_filter);

    if let Some(out) = &args.out {
        write_run(&run, out, args.format.into())?;
        println!(
            "{} {}",
            "Results written to:".bright_green().bold(),
            out.display().to_string().cyan()
        );
    }

    Ok(())
}

fn display_run(run: &ScoringRun, top: usize, tier: Option<RiskTier>) {
    let meta = &run.metadata;
    println!(
        "{} {} users, run {}",
        "Scored".bright_blue().bold(),
        meta.n_users,
        meta.run_id
    );

    let contributing: Vec<&str> = meta.contributing.iter().map(|k| k.as_str()).collect();
    println!("  contributing estimators: {}", contributing.join(", "));
    for failure in &meta.failures {
        println!(
            "  {} {}: {}{}",
            "excluded".yellow(),
            failure.estimator,
            failure.message,
            if failure.worker_abandoned { " (worker abandoned)" } else { "" }
        );
    }
    if run.has_synthetic_data() {
        println!(
            "  {} synthetic values used for: {}",
            "warning:".yellow().bold(),
            meta.synthetic_features.join(", ")
        );
    }
    println!();

    let report = run.report();
    print!("{}", report.tier_summary());
    println!();

    let selected = match tier {
        Some(tier) => report.filter_tier(tier),
        None => report.ranked(),
    };
    let rows: Vec<TopRow> = selected
        .into_iter()
        .take(top)
        .map(|a| TopRow {
            user: a.user_id.clone(),
            severity: format!("{:.2}", a.severity_index),
            severity_tier: a.severity_tier.to_string(),
            votes: format!("{}/{}", a.vote_count, a.vote_denominator),
            risk_tier: a.risk_tier.to_string(),
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "No users match the selection".dimmed());
    } else {
        println!("{}", Table::new(rows).with(TableStyle::rounded()));
    }
}

/// Print the default configuration as YAML
pub fn print_default_config() -> anyhow::Result<()> {
    println!("{}", "# Default aura-risk configuration".dimmed());
    println!("{}", "# Usage: aura-risk score users.json --config your-config.yml".dimmed());
    println!();

    let yaml_output = serde_yaml::to_string(&RiskEngineConfig::default())?;
    println!("{yaml_output}");
    Ok(())
}

/// Validate a configuration file
pub fn validate_config(args: ValidateConfigArgs) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "Validating configuration:".bright_blue().bold(),
        args.config.display().to_string().cyan()
    );

    match load_configuration(Some(&args.config)) {
        Ok(config) => {
            println!("{}", "Configuration file is valid".bright_green().bold());
            let enabled: Vec<&str> = config
                .estimators
                .enabled_kinds()
                .into_iter()
                .map(|k| k.as_str())
                .collect();
            println!("  seed: {}", config.seed);
            println!("  features: {}", config.features.feature_names().join(", "));
            println!("  estimators: {}", enabled.join(", "));
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "Configuration validation failed:".red(), e);
            eprintln!(
                "{}",
                "Tip: use 'aura-risk print-default-config' to see the valid format".dimmed()
            );
            Err(e)
        }
    }
}
