//! Dynamo Emulator Core - configuration and shared types
//!
//! This crate holds the settings every build step reads and the error type
//! shared between the instance and table crates.

pub mod config;
pub mod error;

pub use config::{
    AppConfig, EmulatorConfig, ReadinessConfig, ShutdownConfig, TablesConfig, CONFIG_FILE_NAME,
    DEFAULT_PORT,
};
pub use error::{DynamoEmulatorError, Result};

/// Tool version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tool name
pub const APP_NAME: &str = "dynamo-emulator";
