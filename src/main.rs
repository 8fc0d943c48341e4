//! Dynamo Emulator - build-step entry point

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dynamo_emulator::cli::Cli;
use dynamo_emulator::core::{AppConfig, APP_NAME, VERSION};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    debug!("{} v{}", APP_NAME, VERSION);

    let config = match AppConfig::load(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) if e.is_config_error() => {
            error!("{}", e);
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };
    cli.command.execute(config).await
}
