//! Command-line interface

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dynamo_emulator_core::AppConfig;

use crate::commands::{ConfigCommand, CreateTableCommand, RunCommand, StartCommand, StopCommand};

#[derive(Parser, Debug)]
#[command(name = "dynamo-emulator")]
#[command(about = "Start, stop and seed a local DynamoDB emulator around integration tests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./dynamo-emulator.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the emulator and leave it running for later steps
    Start(StartCommand),
    /// Stop the emulator started by `start`
    Stop(StopCommand),
    /// Create tables from JSON definition files
    CreateTable(CreateTableCommand),
    /// Start the emulator, run a command, then stop the emulator
    Run(RunCommand),
    /// Print the effective configuration
    Config,
}

impl Command {
    pub async fn execute(&self, config: AppConfig) -> Result<ExitCode> {
        match self {
            Command::Start(cmd) => cmd.execute(config).await,
            Command::Stop(cmd) => cmd.execute(config).await,
            Command::CreateTable(cmd) => cmd.execute(config).await,
            Command::Run(cmd) => cmd.execute(config).await,
            Command::Config => ConfigCommand.execute(&config),
        }
    }
}
