//! Emulator Launcher
//!
//! Builds the emulator command line and spawns it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use dynamo_emulator_core::AppConfig;
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, info};

use crate::instance::{InstanceError, InstanceHandle};

/// Launch errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Emulator executable not found: {}", .program.display())]
    ProgramNotFound {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("Permission denied running {}", .program.display())]
    PermissionDenied {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("Port {port} is already in use by another process")]
    PortInUse { port: u16, source: std::io::Error },
    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDirectoryMissing(PathBuf),
    #[error("Failed to open emulator log {}", .path.display())]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("Emulator on port {port} exited before becoming ready ({status})")]
    ExitedEarly { port: u16, status: String },
    #[error(transparent)]
    Instance(#[from] InstanceError),
}

/// Everything needed to start one emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    port: u16,
    program: PathBuf,
    base_args: Vec<String>,
    extra_args: Vec<String>,
    port_flag: String,
    working_dir: PathBuf,
    log_file: Option<PathBuf>,
}

impl LaunchSpec {
    /// Spec running `program` in the current directory with `-port <port>`
    pub fn new(port: u16, program: impl Into<PathBuf>) -> Self {
        Self {
            port,
            program: program.into(),
            base_args: Vec::new(),
            extra_args: Vec::new(),
            port_flag: "-port".to_string(),
            working_dir: PathBuf::from("."),
            log_file: None,
        }
    }

    /// Spec for `port` from the configured emulator invocation
    pub fn from_config(config: &AppConfig, port: u16) -> Self {
        let emulator = &config.emulator;
        Self::new(port, emulator.resolved_program())
            .with_base_args(emulator.base_args.clone())
            .with_extra_args(emulator.args.clone())
            .with_port_flag(emulator.port_flag.clone())
            .with_working_dir(emulator.working_dir.clone())
            .with_log_file(config.log_file_for(port))
    }

    /// Arguments placed before the extra arguments
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Arguments passed through verbatim
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_port_flag(mut self, flag: impl Into<String>) -> Self {
        self.port_flag = flag.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Arguments after the program: base, extra, then the port flag and port
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(self.extra_args.iter().cloned());
        args.push(self.port_flag.clone());
        args.push(self.port.to_string());
        args
    }
}

/// Starts an emulator process for a spec
#[async_trait]
pub trait Launch: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError>;
}

/// Spawns the emulator as a child process
#[derive(Debug, Clone, Default)]
pub struct InstanceLauncher;

impl InstanceLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Fail early if something we do not know about already holds the port
    async fn ensure_port_free(port: u16) -> Result<(), LaunchError> {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                drop(listener);
                Ok(())
            }
            Err(source) => Err(LaunchError::PortInUse { port, source }),
        }
    }

    fn output(spec: &LaunchSpec) -> Result<(Stdio, Stdio), LaunchError> {
        let Some(path) = spec.log_file() else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        let open = || -> std::io::Result<std::fs::File> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::OpenOptions::new().create(true).append(true).open(path)
        };
        let log_err = |source: std::io::Error| LaunchError::LogFile {
            path: path.to_path_buf(),
            source,
        };

        let stdout = open().map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

#[async_trait]
impl Launch for InstanceLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<InstanceHandle, LaunchError> {
        if !spec.working_dir().is_dir() {
            return Err(LaunchError::WorkingDirectoryMissing(
                spec.working_dir().to_path_buf(),
            ));
        }

        Self::ensure_port_free(spec.port()).await?;

        let args = spec.to_args();
        info!("Launching emulator on port {}", spec.port());
        debug!("Emulator command: {:?} {:?}", spec.program(), args);

        let (stdout, stderr) = Self::output(spec)?;
        let mut cmd = Command::new(spec.program());
        cmd.args(&args)
            .current_dir(spec.working_dir())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Own process group, so the emulator survives the invoking step
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| {
            let program = spec.program().to_path_buf();
            match source.kind() {
                std::io::ErrorKind::NotFound => LaunchError::ProgramNotFound { program, source },
                std::io::ErrorKind::PermissionDenied => {
                    LaunchError::PermissionDenied { program, source }
                }
                _ => LaunchError::Spawn { program, source },
            }
        })?;

        let handle = InstanceHandle::from_child(spec.port(), child)?;
        info!("Emulator started with PID {}", handle.pid());
        Ok(handle)
    }
}
