//! Error types for droidlink
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Main error type for droidlink
#[derive(Error, Debug)]
pub enum DroidlinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias for droidlink operations
pub type Result<T> = std::result::Result<T, DroidlinkError>;

impl DroidlinkError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DroidlinkError::Io(e) => format!("File operation failed: {}", e),
            DroidlinkError::TomlParse(e) => format!("Invalid config.toml: {}", e),
            _ => self.to_string(),
        }
    }
}
