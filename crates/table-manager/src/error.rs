//! Table setup errors

use std::path::PathBuf;
use std::time::Duration;

/// Table errors
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Failed to read table definition {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid table definition {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("File '{}' does not specify TableName attribute", .path.display())]
    MissingTableName { path: PathBuf },
    #[error("Table '{table}': {field} must be a whole number, got '{value}'")]
    InvalidCapacity {
        table: String,
        field: &'static str,
        value: String,
    },
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid request header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("Unexpected response from {operation}: {reason}")]
    UnexpectedResponse {
        operation: &'static str,
        reason: String,
    },
    #[error("Table '{table}' not active after {waited:?}")]
    ActiveTimeout { table: String, waited: Duration },
}

impl TableError {
    /// Error code reported by the service, if this is a service error
    pub fn api_code(&self) -> Option<&str> {
        match self {
            TableError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}
