//! aura-risk CLI - ensemble risk scoring over a user feature table.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging; RUST_LOG overrides the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Score(args) => {
            cli::score_command(*args).await?;
        }
        Commands::PrintDefaultConfig => {
            cli::print_default_config()?;
        }
        Commands::ValidateConfig(args) => {
            cli::validate_config(args)?;
        }
    }

    Ok(())
}
