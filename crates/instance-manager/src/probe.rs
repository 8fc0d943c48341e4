//! Readiness Probe
//!
//! Polls the emulator port with plain TCP connects until it answers or the
//! timeout runs out. Start-up time depends on host load, so the wait is a
//! bounded retry loop rather than a fixed delay.

use std::time::Duration;

use dynamo_emulator_core::ReadinessConfig;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::instance::InstanceHandle;

/// Outcome of waiting for an emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The port accepted a connection
    Ready { elapsed: Duration, attempts: u32 },
    /// The timeout ran out first
    Timeout { elapsed: Duration, attempts: u32 },
    /// The watched process died while being probed
    Exited { status: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// TCP readiness probe
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    host: String,
    timeout: Duration,
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::from_config(&ReadinessConfig::default())
    }
}

impl ReadinessProbe {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            ..Self::default()
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self {
            host: config.host.clone(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One connection attempt
    pub async fn is_reachable(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((self.host.as_str(), port)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Wait for `port` to accept connections
    pub async fn await_ready(&self, port: u16) -> Readiness {
        self.poll(port, None).await
    }

    /// Wait for the instance's port, giving up early if its process exits
    pub async fn await_instance(&self, handle: &mut InstanceHandle) -> Readiness {
        let port = handle.port();
        self.poll(port, Some(handle)).await
    }

    async fn poll(&self, port: u16, mut handle: Option<&mut InstanceHandle>) -> Readiness {
        let start = Instant::now();
        let mut attempts = 0u32;

        info!(
            "Waiting up to {:?} for emulator on {}:{}",
            self.timeout, self.host, port
        );

        loop {
            attempts += 1;
            if self.is_reachable(port).await {
                let elapsed = start.elapsed();
                info!("Emulator on port {} ready after {:?}", port, elapsed);
                return Readiness::Ready { elapsed, attempts };
            }

            if let Some(handle) = handle.as_deref_mut() {
                if !handle.is_running() {
                    let status = handle.describe_exit();
                    warn!("Emulator on port {} exited while starting ({})", port, status);
                    return Readiness::Exited { status };
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    "Emulator on port {} not ready after {:?} ({} attempts)",
                    port, elapsed, attempts
                );
                return Readiness::Timeout { elapsed, attempts };
            }

            debug!("Port {} not answering yet (attempt {})", port, attempts);
            tokio::time::sleep(self.poll_interval.min(self.timeout - elapsed)).await;
        }
    }
}
