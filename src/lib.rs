//! Dynamo Emulator
//!
//! Runs a local DynamoDB emulator around an integration-test phase:
//!
//! - `dynamo-emulator-core`: configuration and the shared error type
//! - `dynamo-emulator-instance`: port registry, launcher, readiness probe
//!   and the start/stop lifecycle
//! - `dynamo-emulator-tables`: table creation from JSON definitions

pub mod cli;
pub mod commands;

pub use dynamo_emulator_core as core;
pub use dynamo_emulator_instance as instance;
pub use dynamo_emulator_tables as tables;

/// Prelude module for convenient imports
pub mod prelude {
    pub use dynamo_emulator_core::AppConfig;
    pub use dynamo_emulator_instance::{
        LaunchSpec, Lifecycle, PortRegistry, ReadinessProbe, StartOutcome, StopResult,
    };
    pub use dynamo_emulator_tables::{TableCreator, TableDefinition};
}
