//! DynamoDB Table Manager
//!
//! Creates tables described by JSON files against the emulator (or any
//! DynamoDB endpoint).

pub mod client;
pub mod creator;
pub mod definition;
pub mod error;
pub mod signing;

pub use client::{DynamoClient, TableDescription, TableStatus};
pub use creator::{TableCreator, TableOutcome};
pub use definition::{AttributeDefinition, CapacityUnits, KeySchemaElement, ProvisionedThroughput, TableDefinition};
pub use error::TableError;
pub use signing::{Credentials, RequestSigner};
