//! Emulator Configuration
//!
//! Settings for the emulator build steps:
//! - How the emulator process is invoked
//! - Readiness polling and shutdown grace periods
//! - Remote API settings for table creation
//!
//! Every section has defaults so a partial `dynamo-emulator.toml` is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DynamoEmulatorError, Result};

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 10101;

/// Configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "dynamo-emulator.toml";

/// How the emulator process is launched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Executable to run; `java` resolves through JAVA_HOME when it is set
    pub program: String,
    /// Arguments placed before the user arguments
    pub base_args: Vec<String>,
    /// Flag that precedes the port number
    pub port_flag: String,
    /// Directory the emulator runs in
    pub working_dir: PathBuf,
    /// Extra arguments passed through verbatim
    pub args: Vec<String>,
    /// Write emulator stdout/stderr to `<state_dir>/emulator-<port>.log`
    #[serde(alias = "log_file")]
    pub log_to_file: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            base_args: vec![
                "-Djava.library.path=./DynamoDBLocal_lib".to_string(),
                "-jar".to_string(),
                "DynamoDBLocal.jar".to_string(),
            ],
            port_flag: "-port".to_string(),
            working_dir: PathBuf::from("target").join("dynamodb-dist"),
            args: Vec::new(),
            log_to_file: true,
        }
    }
}

impl EmulatorConfig {
    /// Resolve the executable path
    pub fn resolved_program(&self) -> PathBuf {
        if self.program == "java" {
            if let Ok(java_home) = std::env::var("JAVA_HOME") {
                let bin = PathBuf::from(java_home).join("bin");
                return if cfg!(windows) {
                    bin.join("java.exe")
                } else {
                    bin.join("java")
                };
            }
        }
        PathBuf::from(&self.program)
    }
}

/// Readiness polling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Host the probe connects to
    pub host: String,
    /// Total time to wait for the emulator, in milliseconds
    pub timeout_ms: u64,
    /// Delay between connection attempts, in milliseconds
    pub poll_interval_ms: u64,
    /// Bound on a single connection attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            timeout_ms: 10_000,
            poll_interval_ms: 250,
            connect_timeout_ms: 500,
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time between SIGTERM and SIGKILL, in milliseconds
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_period_ms: 5_000 }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Remote API settings for the create-table step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TablesConfig {
    /// Endpoint URL; empty means `http://localhost:<port>`
    pub endpoint: String,
    /// Signing region
    pub region: String,
    /// Access key
    pub key: String,
    /// Secret key
    pub secret: String,
    /// How long to wait for a table to become active, in milliseconds
    pub active_timeout_ms: u64,
    /// Delay between table status checks, in milliseconds
    pub active_poll_interval_ms: u64,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            key: String::new(),
            secret: String::new(),
            active_timeout_ms: 60_000,
            active_poll_interval_ms: 500,
        }
    }
}

impl TablesConfig {
    /// Endpoint URL for an emulator listening on `port`
    pub fn endpoint_for(&self, port: u16) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            format!("http://localhost:{}", port)
        } else if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        }
    }

    pub fn active_timeout(&self) -> Duration {
        Duration::from_millis(self.active_timeout_ms)
    }

    pub fn active_poll_interval(&self) -> Duration {
        Duration::from_millis(self.active_poll_interval_ms)
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Port the emulator listens on
    pub port: u16,
    /// Where instance records and logs are kept between invocations
    pub state_dir: PathBuf,
    /// Process invocation
    pub emulator: EmulatorConfig,
    /// Readiness probe
    pub readiness: ReadinessConfig,
    /// Shutdown
    pub shutdown: ShutdownConfig,
    /// Table creation
    pub tables: TablesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            state_dir: PathBuf::from("target").join("dynamo-emulator"),
            emulator: EmulatorConfig::default(),
            readiness: ReadinessConfig::default(),
            shutdown: ShutdownConfig::default(),
            tables: TablesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `dynamo-emulator.toml` in the
    /// working directory is used when present, otherwise the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(DynamoEmulatorError::Config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let candidate = PathBuf::from(CONFIG_FILE_NAME);
                if !candidate.exists() {
                    info!("No {} found, using defaults", CONFIG_FILE_NAME);
                    return Ok(AppConfig::default());
                }
                candidate
            }
        };

        debug!("Loading config from {:?}", config_file);
        let contents = tokio::fs::read_to_string(&config_file).await?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        validate_port(self.port)?;
        if self.emulator.program.trim().is_empty() {
            return Err(DynamoEmulatorError::Config("emulator.program is empty".into()));
        }
        if self.emulator.port_flag.trim().is_empty() {
            return Err(DynamoEmulatorError::Config("emulator.port_flag is empty".into()));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(DynamoEmulatorError::Config(
                "readiness.poll_interval_ms must be positive".into(),
            ));
        }
        if self.tables.active_poll_interval_ms == 0 {
            return Err(DynamoEmulatorError::Config(
                "tables.active_poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Override the port
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        validate_port(port)?;
        self.port = port;
        Ok(())
    }

    /// Log file for the emulator on `port`, if file logging is enabled
    pub fn log_file_for(&self, port: u16) -> Option<PathBuf> {
        self.emulator
            .log_to_file
            .then(|| self.state_dir.join(format!("emulator-{}.log", port)))
    }
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(DynamoEmulatorError::Config(
            "port must be between 1 and 65535".into(),
        ));
    }
    Ok(())
}
