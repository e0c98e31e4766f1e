//! Peerlink CLI entry point

use clap::Parser;
use tracing::{error, info};

use peerlink_cli::{app::PeerlinkApp, cli::Cli, config::AppConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?.with_overrides(cli.name.clone(), cli.port)?;

    let app = match PeerlinkApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(cli.command).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Peerlink exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or the default location
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(config_path) => AppConfig::load_from_file(config_path),
        None => AppConfig::load(),
    }
}
