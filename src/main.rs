//! tldw CLI entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tldw::cli::{commands, Cli, Commands};
use tldw::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tldw={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    // Execute command
    match &cli.command {
        Commands::Serve { host, port, no_workers } => {
            commands::run_serve(host.as_deref(), *port, *no_workers, settings).await?;
        }

        Commands::Worker => {
            commands::run_worker(settings).await?;
        }

        Commands::Request { kind, video, language, wait } => {
            commands::run_request(kind, video, language.as_deref(), *wait, settings).await?;
        }

        Commands::Status { kind, video, language } => {
            commands::run_status(kind, video, language.as_deref(), settings).await?;
        }

        Commands::Restart { kind, video, language } => {
            commands::run_restart(kind, video, language.as_deref(), settings).await?;
        }

        Commands::Delete { video, language } => {
            commands::run_delete(video, language.as_deref(), settings).await?;
        }

        Commands::Credentials { action } => {
            commands::run_credentials(action, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, config_path)?;
        }
    }

    Ok(())
}
