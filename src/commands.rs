//! CLI commands
//!
//! Each build step is one command. Steps run as separate processes, so an
//! emulator started by `start` is detached and found again by `stop` through
//! its instance record.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use dynamo_emulator_core::AppConfig;
use dynamo_emulator_instance::{LaunchSpec, Lifecycle, PortRegistry, StartOutcome, StopResult};
use dynamo_emulator_tables::{TableCreator, TableOutcome};
use tokio::process::Command;
use tracing::{info, warn};

/// Environment variable that skips `start`, `stop` and `create-table`
pub const SKIP_ENV: &str = "DYNAMO_EMULATOR_SKIP";

/// Environment variable carrying the emulator port into `run` commands
pub const PORT_ENV: &str = "DYNAMO_EMULATOR_PORT";

/// Environment variable carrying the table endpoint into `run` commands
pub const ENDPOINT_ENV: &str = "DYNAMO_EMULATOR_ENDPOINT";

/// Options shared by the steps that start an emulator
#[derive(Args, Debug, Clone, Default)]
pub struct EmulatorOptions {
    /// Port the emulator listens on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Extra emulator argument, e.g. `--arg=-inMemory` (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// How long to wait for the emulator to accept connections
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl EmulatorOptions {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(port) = self.port {
            config.set_port(port)?;
        }
        if !self.args.is_empty() {
            config.emulator.args = self.args.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            config.readiness.timeout_ms = timeout;
        }
        Ok(())
    }
}

/// Connection options for table creation
#[derive(Args, Debug, Clone, Default)]
pub struct TableOptions {
    /// Endpoint URL; defaults to the local emulator
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Access key
    #[arg(long)]
    pub key: Option<String>,

    /// Secret key
    #[arg(long)]
    pub secret: Option<String>,

    /// Signing region
    #[arg(long)]
    pub region: Option<String>,
}

impl TableOptions {
    fn apply(&self, config: &mut AppConfig) {
        let tables = &mut config.tables;
        if let Some(endpoint) = &self.endpoint {
            tables.endpoint = endpoint.clone();
        }
        if let Some(key) = &self.key {
            tables.key = key.clone();
        }
        if let Some(secret) = &self.secret {
            tables.secret = secret.clone();
        }
        if let Some(region) = &self.region {
            tables.region = region.clone();
        }
    }
}

fn lifecycle(config: &AppConfig) -> Lifecycle {
    Lifecycle::from_config(config, Arc::new(PortRegistry::new()))
}

fn skipped() -> Result<ExitCode> {
    info!("Execution skipped");
    Ok(ExitCode::SUCCESS)
}

/// Start the emulator and leave it running
#[derive(Args, Debug, Clone, Default)]
pub struct StartCommand {
    #[command(flatten)]
    pub emulator: EmulatorOptions,

    /// Do nothing
    #[arg(long, env = SKIP_ENV)]
    pub skip: bool,
}

impl StartCommand {
    /// Execute the start command
    pub async fn execute(&self, mut config: AppConfig) -> Result<ExitCode> {
        if self.skip {
            return skipped();
        }
        self.emulator.apply(&mut config)?;

        let port = config.port;
        let lifecycle = lifecycle(&config);
        let spec = LaunchSpec::from_config(&config, port);

        let outcome = lifecycle
            .start(&spec)
            .await
            .with_context(|| format!("Failed to start emulator on port {}", port))?;

        match outcome {
            StartOutcome::Started(info) => {
                info!("Emulator started on port {} (pid {})", port, info.pid)
            }
            StartOutcome::AlreadyRunning(info) => {
                info!("Emulator already running on port {} (pid {})", port, info.pid)
            }
        }

        lifecycle.detach(port).await;
        Ok(ExitCode::SUCCESS)
    }
}

/// Stop the emulator started by an earlier `start`
#[derive(Args, Debug, Clone, Default)]
pub struct StopCommand {
    /// Port the emulator listens on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do nothing
    #[arg(long, env = SKIP_ENV)]
    pub skip: bool,
}

impl StopCommand {
    /// Execute the stop command
    pub async fn execute(&self, mut config: AppConfig) -> Result<ExitCode> {
        if self.skip {
            return skipped();
        }
        if let Some(port) = self.port {
            config.set_port(port)?;
        }

        let port = config.port;
        let result = lifecycle(&config)
            .stop(port)
            .await
            .with_context(|| format!("Failed to stop emulator on port {}", port))?;

        match result {
            StopResult::Stopped { info, forced } => {
                let how = if forced { "killed" } else { "stopped" };
                info!("Emulator on port {} (pid {}) {}", port, info.pid, how);
            }
            StopResult::AlreadyStopped { .. } => {
                info!("Emulator on port {} had already exited", port)
            }
            StopResult::NotRunning { .. } => info!("No emulator running on port {}", port),
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Create tables from JSON definition files
#[derive(Args, Debug, Clone, Default)]
pub struct CreateTableCommand {
    /// Table definition file (repeatable)
    #[arg(long = "table", value_name = "FILE", required = true)]
    pub tables: Vec<PathBuf>,

    #[command(flatten)]
    pub connection: TableOptions,

    /// Port of the local emulator, used when no endpoint is given
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do nothing
    #[arg(long, env = SKIP_ENV)]
    pub skip: bool,
}

impl CreateTableCommand {
    /// Execute the create-table command
    pub async fn execute(&self, mut config: AppConfig) -> Result<ExitCode> {
        if self.skip {
            return skipped();
        }
        if let Some(port) = self.port {
            config.set_port(port)?;
        }
        self.connection.apply(&mut config);

        create_tables(&config, &self.tables).await?;
        Ok(ExitCode::SUCCESS)
    }
}

async fn create_tables(config: &AppConfig, tables: &[PathBuf]) -> Result<Vec<TableOutcome>> {
    let creator = TableCreator::from_config(&config.tables, config.port)?;
    info!(
        "Creating {} table(s) at {}",
        tables.len(),
        creator.client().endpoint()
    );
    let outcomes = creator
        .create_all(tables)
        .await
        .context("Failed to create tables")?;
    Ok(outcomes)
}

/// Start the emulator, run a command against it, then stop it
#[derive(Args, Debug, Clone, Default)]
pub struct RunCommand {
    #[command(flatten)]
    pub emulator: EmulatorOptions,

    /// Table definition to create before running the command (repeatable)
    #[arg(long = "table", value_name = "FILE")]
    pub tables: Vec<PathBuf>,

    /// Command to run, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl RunCommand {
    /// Execute the run command; the exit code is the command's
    pub async fn execute(&self, mut config: AppConfig) -> Result<ExitCode> {
        self.emulator.apply(&mut config)?;

        let port = config.port;
        let lifecycle = lifecycle(&config);
        let spec = LaunchSpec::from_config(&config, port);

        let outcome = lifecycle
            .start(&spec)
            .await
            .with_context(|| format!("Failed to start emulator on port {}", port))?;

        let result = self.run_against_emulator(&config).await;

        match outcome {
            StartOutcome::Started(_) => {
                if let Err(e) = lifecycle.stop(port).await {
                    warn!("Failed to stop emulator on port {}: {}", port, e);
                }
            }
            // Someone else's emulator; leave it be
            StartOutcome::AlreadyRunning(_) => {
                lifecycle.detach(port).await;
            }
        }

        result
    }

    async fn run_against_emulator(&self, config: &AppConfig) -> Result<ExitCode> {
        if !self.tables.is_empty() {
            create_tables(config, &self.tables).await?;
        }

        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("No command given");
        };

        info!("Running {}", self.command.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .env(PORT_ENV, config.port.to_string())
            .env(ENDPOINT_ENV, config.tables.endpoint_for(config.port))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", program))?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping {}", program);
                child.kill().await?;
                return Ok(ExitCode::from(130));
            }
        };

        info!("{} exited with {}", program, status);
        Ok(match status.code() {
            Some(0) => ExitCode::SUCCESS,
            Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            None => ExitCode::FAILURE,
        })
    }
}

/// Print the effective configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigCommand;

impl ConfigCommand {
    /// Execute the config command
    pub fn execute(&self, config: &AppConfig) -> Result<ExitCode> {
        print!("{}", config.to_toml_string()?);
        Ok(ExitCode::SUCCESS)
    }
}
