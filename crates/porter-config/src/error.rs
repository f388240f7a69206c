//! Configuration error types

/// Errors produced while loading or validating configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("invalid configuration: {message}")]
    Invalid {
        /// What is wrong with the value
        message: String,
    },
}

impl ConfigError {
    /// Create a new validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
