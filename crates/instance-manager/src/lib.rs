//! Emulator Instance Manager
//!
//! Starts at most one emulator per port, waits for it to accept connections
//! and stops it again.

pub mod instance;
pub mod launcher;
pub mod lifecycle;
mod platform;
pub mod probe;
pub mod record;
pub mod registry;

pub use instance::{InstanceError, InstanceHandle, InstanceInfo, InstanceState, StopOutcome};
pub use launcher::{InstanceLauncher, Launch, LaunchError, LaunchSpec};
pub use lifecycle::{Lifecycle, LifecycleError, StartOutcome, StopResult, DEFAULT_GRACE_PERIOD};
pub use probe::{Readiness, ReadinessProbe};
pub use record::{InstanceRecord, StateDir};
pub use registry::{Acquired, PortRegistry, RegistryError, Reservation};

