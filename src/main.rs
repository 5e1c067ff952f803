use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use squall_core::Config;

/// Resilient weather lookup service
#[derive(Parser)]
#[command(name = "squall", version, about = "Resilient read-through cache in front of a weather provider")]
struct Cli {
    /// Config file (TOML). Defaults to $SQUALL_CONFIG, then the per-user config dir.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Validate configuration, print the result and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    squall_core::init_logging(&config.logging)?;

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    if cli.check_config {
        for error in &validation.errors {
            println!("error: {}", error);
        }
        for warning in &validation.warnings {
            println!("warning: {}", warning);
        }
        if !validation.is_valid() {
            anyhow::bail!("Configuration has {} error(s)", validation.errors.len());
        }
        println!("Configuration OK");
        return Ok(());
    }

    if !validation.is_valid() {
        anyhow::bail!("Invalid configuration: {}", validation.error_summary());
    }

    tracing::debug!(?config, "Effective configuration");

    if let Err(e) = squall_server::serve(&config).await {
        tracing::error!("{} ({})", e, e.hint());
        return Err(e.into());
    }

    Ok(())
}
