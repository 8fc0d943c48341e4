//! Port Registry
//!
//! Which ports have an emulator running and who owns it. Each port has its own
//! async lock, so a start on one port never waits for a start on another while
//! two starts on the same port are serialized. Lookups read a separate index
//! and never wait on a port lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::instance::{InstanceHandle, InstanceInfo, StopOutcome};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Port {port} reservation cannot hold an instance for port {instance_port}")]
    PortMismatch { port: u16, instance_port: u16 },
    #[error("Reservation for port {0} belongs to a different registry")]
    ForeignReservation(u16),
    #[error("Port {0} already has a registered instance")]
    Occupied(u16),
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Vacant,
    Occupied(InstanceHandle),
}

/// Result of [`PortRegistry::acquire`]
#[derive(Debug)]
pub enum Acquired {
    /// An instance is registered and its process is alive
    AlreadyRunning(InstanceInfo),
    /// The caller now has exclusive right to start one
    Reserved(Reservation),
}

/// Exclusive claim on a vacant port.
///
/// Other acquirers of the same port wait until it is registered or dropped.
pub struct Reservation {
    port: u16,
    guard: OwnedMutexGuard<Slot>,
}

impl Reservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation").field("port", &self.port).finish()
    }
}

/// Running emulators keyed by port
#[derive(Debug, Default)]
pub struct PortRegistry {
    slots: Mutex<HashMap<u16, Arc<AsyncMutex<Slot>>>>,
    /// Registered instances; only changed while the port's slot is locked
    running: Mutex<BTreeMap<u16, InstanceInfo>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, port: u16) -> Arc<AsyncMutex<Slot>> {
        self.slots.lock().entry(port).or_default().clone()
    }


    /// Check `port` and, if nothing live is registered, reserve it.
    ///
    /// Waits while another caller holds a reservation for the same port. A
    /// registered instance whose process has died is discarded here.
    pub async fn acquire(&self, port: u16) -> Acquired {
        let mut guard = self.slot(port).lock_owned().await;

        if let Slot::Occupied(handle) = &mut *guard {
            if handle.is_running() {
                debug!("Port {} already has emulator pid {}", port, handle.pid());
                return Acquired::AlreadyRunning(handle.info());
            }
            warn!(
                "Emulator on port {} (pid {}) exited unexpectedly ({})",
                port,
                handle.pid(),
                handle.describe_exit()
            );
            *guard = Slot::Vacant;
            self.running.lock().remove(&port);
        }

        Acquired::Reserved(Reservation { port, guard })
    }

    /// Record a ready instance under its reservation
    pub fn register(
        &self,
        reservation: Reservation,
        handle: InstanceHandle,
    ) -> Result<InstanceInfo, RegistryError> {
        let Reservation { port, mut guard } = reservation;

        if handle.port() != port {
            return Err(RegistryError::PortMismatch {
                port,
                instance_port: handle.port(),
            });
        }

        let owned = self
            .slots
            .lock()
            .get(&port)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&guard)));
        if !owned {
            return Err(RegistryError::ForeignReservation(port));
        }

        if matches!(*guard, Slot::Occupied(_)) {
            return Err(RegistryError::Occupied(port));
        }

        let info = handle.info();
        *guard = Slot::Occupied(handle);
        self.running.lock().insert(port, info);
        info!("Registered emulator on port {} (pid {})", port, info.pid);
        Ok(info)
    }

    /// Remove and return the instance on `port`, waiting for any start in progress
    pub async fn release(&self, port: u16) -> Option<InstanceHandle> {
        let slot = self.slots.lock().get(&port).cloned()?;
        let mut guard = slot.lock().await;

        match std::mem::take(&mut *guard) {
            Slot::Occupied(handle) => {
                self.running.lock().remove(&port);
                debug!("Released port {}", port);
                Some(handle)
            }
            Slot::Vacant => None,
        }
    }

    /// Whether an instance is registered on `port`.
    ///
    /// A start still in progress is not registered yet.
    pub fn contains(&self, port: u16) -> bool {
        self.running.lock().contains_key(&port)
    }

    pub fn info(&self, port: u16) -> Option<InstanceInfo> {
        self.running.lock().get(&port).copied()
    }

    /// Ports with a registered instance, ascending
    pub fn running_ports(&self) -> Vec<u16> {
        self.running.lock().keys().copied().collect()
    }

    /// Stop every registered instance. Used on shutdown.
    pub async fn shutdown(&self, grace: Duration) -> Vec<(u16, StopOutcome)> {
        let mut handles = Vec::new();
        for port in self.running_ports() {
            if let Some(handle) = self.release(port).await {
                handles.push(handle);
            }
        }

        if !handles.is_empty() {
            info!("Stopping {} emulator(s)", handles.len());
        }

        let stops = handles.into_iter().map(|mut handle| async move {
            let port = handle.port();
            match handle.stop(grace).await {
                Ok(outcome) => Some((port, outcome)),
                Err(e) => {
                    warn!("Failed to stop emulator on port {}: {}", port, e);
                    None
                }
            }
        });

        futures::future::join_all(stops)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
