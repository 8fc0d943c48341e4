//! Error types for the emulator tooling
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Main error type shared by the emulator crates
#[derive(Error, Debug)]
pub enum DynamoEmulatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file is not valid TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, DynamoEmulatorError>;

impl DynamoEmulatorError {
    /// Whether the user can fix this by editing the configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DynamoEmulatorError::Config(_) | DynamoEmulatorError::TomlParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors() {
        assert!(DynamoEmulatorError::Config("port".into()).is_config_error());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!DynamoEmulatorError::from(io).is_config_error());
    }

    #[test]
    fn test_message() {
        let err = DynamoEmulatorError::Config("port must be between 1 and 65535".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: port must be between 1 and 65535"
        );
    }
}
