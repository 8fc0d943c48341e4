//! Emulator Lifecycle
//!
//! The start/stop entry points. Start reserves the port, launches the
//! emulator, waits for readiness and registers the handle; stop releases the
//! handle and terminates the process.

use std::sync::Arc;
use std::time::Duration;

use dynamo_emulator_core::{AppConfig, DynamoEmulatorError};
use tracing::{info, warn};

use crate::instance::{InstanceError, InstanceHandle, InstanceInfo, InstanceState, StopOutcome};
use crate::launcher::{InstanceLauncher, Launch, LaunchError, LaunchSpec};
use crate::probe::{Readiness, ReadinessProbe};
use crate::record::{InstanceRecord, StateDir};
use crate::registry::{Acquired, PortRegistry, RegistryError, Reservation};

/// Default time a process gets between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid port {0}")]
    InvalidPort(u16),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("Emulator on port {port} did not become ready within {waited:?}")]
    ReadinessTimeout { port: u16, waited: Duration },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error("Instance record error: {0}")]
    Record(#[from] DynamoEmulatorError),
}

/// Result of [`Lifecycle::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(InstanceInfo),
    AlreadyRunning(InstanceInfo),
}

impl StartOutcome {
    pub fn info(&self) -> InstanceInfo {
        match self {
            StartOutcome::Started(info) | StartOutcome::AlreadyRunning(info) => *info,
        }
    }
}

/// Result of [`Lifecycle::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    Stopped { info: InstanceInfo, forced: bool },
    /// The instance was known but its process had already gone
    AlreadyStopped { port: u16 },
    /// Nothing known on this port
    NotRunning { port: u16 },
}

/// Start/stop orchestration over a shared registry
pub struct Lifecycle<L: Launch = InstanceLauncher> {
    registry: Arc<PortRegistry>,
    launcher: L,
    probe: ReadinessProbe,
    grace: Duration,
    state_dir: Option<StateDir>,
}

impl Lifecycle<InstanceLauncher> {
    pub fn new(registry: Arc<PortRegistry>) -> Self {
        Self::with_launcher(registry, InstanceLauncher::new())
    }

    /// Lifecycle using the configured probe, grace period and state directory
    pub fn from_config(config: &AppConfig, registry: Arc<PortRegistry>) -> Self {
        Self::new(registry)
            .with_probe(ReadinessProbe::from_config(&config.readiness))
            .with_grace_period(config.shutdown.grace_period())
            .with_state_dir(StateDir::new(&config.state_dir))
    }
}

impl<L: Launch> Lifecycle<L> {
    pub fn with_launcher(registry: Arc<PortRegistry>, launcher: L) -> Self {
        Self {
            registry,
            launcher,
            probe: ReadinessProbe::default(),
            grace: DEFAULT_GRACE_PERIOD,
            state_dir: None,
        }
    }

    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Persist instance records so other invocations can find them
    pub fn with_state_dir(mut self, state_dir: StateDir) -> Self {
        self.state_dir = Some(state_dir);
        self
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    pub fn probe(&self) -> &ReadinessProbe {
        &self.probe
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Start an emulator for `spec`, or report the one already on its port
    pub async fn start(&self, spec: &LaunchSpec) -> Result<StartOutcome, LifecycleError> {
        let port = spec.port();
        if port == 0 {
            return Err(LifecycleError::InvalidPort(port));
        }

        let reservation = match self.registry.acquire(port).await {
            Acquired::AlreadyRunning(info) => {
                info!("Emulator already running on port {} (pid {})", port, info.pid);
                return Ok(StartOutcome::AlreadyRunning(info));
            }
            Acquired::Reserved(reservation) => reservation,
        };

        if let Some(handle) = self.recorded_instance(port).await? {
            let info = self.registry.register(reservation, handle)?;
            info!(
                "Emulator from an earlier run is serving port {} (pid {})",
                port, info.pid
            );
            return Ok(StartOutcome::AlreadyRunning(info));
        }

        let mut handle = self.launcher.launch(spec).await?;
        handle.set_state(InstanceState::Probing);

        match self.probe.await_instance(&mut handle).await {
            Readiness::Ready { .. } => {}
            Readiness::Timeout { elapsed, .. } => {
                self.abandon(handle).await;
                return Err(LifecycleError::ReadinessTimeout {
                    port,
                    waited: elapsed,
                });
            }
            Readiness::Exited { status } => {
                self.abandon(handle).await;
                return Err(LaunchError::ExitedEarly { port, status }.into());
            }
        }

        handle.set_state(InstanceState::Ready);
        self.register(reservation, handle).await.map(StartOutcome::Started)
    }

    /// Stop the emulator on `port`
    pub async fn stop(&self, port: u16) -> Result<StopResult, LifecycleError> {
        let handle = match self.registry.release(port).await {
            Some(handle) => Some(handle),
            None => self.recorded_instance(port).await?,
        };

        let Some(mut handle) = handle else {
            info!("No emulator running on port {}", port);
            return Ok(StopResult::NotRunning { port });
        };

        let info = handle.info();
        let outcome = handle.stop(self.grace).await?;
        self.forget(port).await?;

        Ok(match outcome {
            StopOutcome::Stopped { forced } => StopResult::Stopped { info, forced },
            StopOutcome::AlreadyStopped => StopResult::AlreadyStopped { port },
        })
    }

    /// Leave the emulator on `port` running after this process exits.
    ///
    /// Its record stays on disk for a later `stop`.
    pub async fn detach(&self, port: u16) -> Option<InstanceInfo> {
        self.registry.release(port).await.map(InstanceHandle::detach)
    }

    /// The emulator on `port`, from the registry or a live record
    pub async fn status(&self, port: u16) -> Result<Option<InstanceInfo>, LifecycleError> {
        if let Some(info) = self.registry.info(port) {
            return Ok(Some(info));
        }

        let Some(state_dir) = &self.state_dir else {
            return Ok(None);
        };
        let Some(record) = load_record(state_dir, port).await? else {
            return Ok(None);
        };

        let mut handle = InstanceHandle::adopt(&record);
        let serving = self.is_serving(&mut handle).await;
        let info = handle.detach();
        Ok(serving.then_some(info))
    }

    /// Stop every instance this lifecycle started and still owns
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        for (port, _) in self.registry.shutdown(self.grace).await {
            self.forget(port).await?;
        }
        Ok(())
    }

    async fn register(
        &self,
        reservation: Reservation,
        handle: InstanceHandle,
    ) -> Result<InstanceInfo, LifecycleError> {
        let port = handle.port();
        let info = self.registry.register(reservation, handle)?;

        if let Some(state_dir) = &self.state_dir {
            if let Err(e) = state_dir.save(&InstanceRecord::from(&info)).await {
                warn!("Failed to record emulator on port {}: {}", port, e);
                if let Some(mut handle) = self.registry.release(port).await {
                    handle.stop(self.grace).await?;
                }
                return Err(e.into());
            }
        }

        info!("Emulator ready on port {} (pid {})", port, info.pid);
        Ok(info)
    }

    /// A live, reachable instance recorded by an earlier invocation.
    ///
    /// Any other record is removed without signalling its pid, which may have
    /// been reused by an unrelated process.
    async fn recorded_instance(&self, port: u16) -> Result<Option<InstanceHandle>, LifecycleError> {
        let Some(state_dir) = &self.state_dir else {
            return Ok(None);
        };
        let Some(record) = load_record(state_dir, port).await? else {
            return Ok(None);
        };

        let mut handle = InstanceHandle::adopt(&record);
        if self.is_serving(&mut handle).await {
            return Ok(Some(handle));
        }

        warn!(
            "Removing stale record for port {} (pid {} is gone or not serving)",
            port, record.pid
        );
        handle.detach();
        state_dir.remove(port).await?;
        Ok(None)
    }

    async fn is_serving(&self, handle: &mut InstanceHandle) -> bool {
        handle.is_running() && self.probe.is_reachable(handle.port()).await
    }

    async fn forget(&self, port: u16) -> Result<(), LifecycleError> {
        if let Some(state_dir) = &self.state_dir {
            state_dir.remove(port).await?;
        }
        Ok(())
    }

    /// Kill an instance that failed to come up
    async fn abandon(&self, mut handle: InstanceHandle) {
        handle.set_state(InstanceState::Failed);
        if let Err(e) = handle.stop(self.grace).await {
            warn!(
                "Failed to stop emulator on port {} (pid {}): {}",
                handle.port(),
                handle.pid(),
                e
            );
        }
    }
}

/// The record for `port`. One that cannot be parsed, such as a write cut short,
/// is removed and treated as absent.
async fn load_record(
    state_dir: &StateDir,
    port: u16,
) -> Result<Option<InstanceRecord>, LifecycleError> {
    match state_dir.load(port).await {
        Ok(record) => Ok(record),
        Err(DynamoEmulatorError::Json(e)) => {
            warn!("Removing unreadable record for port {}: {}", port, e);
            state_dir.remove(port).await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
