//! scratchlink - BLE agent for Scratch-style web pages

use std::path::Path;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scratchlink_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(&cli)?;

    // Initialize logging
    setup_logging(cli.verbose || config.logging.verbose);
    match &cli.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("Using default configuration location"),
    }

    CommandDispatcher::execute(cli.command(), config).await?;
    Ok(())
}

/// Setup logging; `RUST_LOG` takes precedence over the verbosity flag
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration and apply the command line override
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref().map(Path::new))?;

    if let Some(address) = &cli.address {
        config.server.address = address.clone();
    }

    config.validate()?;
    Ok(config)
}
