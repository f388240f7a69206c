//! Configuration management for Porter
//!
//! Typed configuration with validated values, TOML file loading,
//! `PORTER_*` environment overrides and tracing/logging initialization.
//!
//! # Examples
//!
//! ```rust
//! use porter_config::Config;
//!
//! let config = Config::default();
//! assert_eq!(config.io.block_size.get(), 1024 * 1024);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};

pub mod error;
pub mod loader;
pub mod logging;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use logging::init_logging;

/// Block size for the worker's read/write loop, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockSize(usize);

impl BlockSize {
    /// Minimum block size (4 KiB)
    pub const MIN: usize = 4 * 1024;
    /// Maximum block size (64 MiB)
    pub const MAX: usize = 64 * 1024 * 1024;
    /// Default block size (1 MiB)
    pub const DEFAULT: usize = 1024 * 1024;

    /// Create a new block size with validation
    pub fn new(size: usize) -> ConfigResult<Self> {
        if size < Self::MIN {
            Err(ConfigError::invalid(format!(
                "block size {} is below minimum {}",
                size,
                Self::MIN
            )))
        } else if size > Self::MAX {
            Err(ConfigError::invalid(format!(
                "block size {} exceeds maximum {}",
                size,
                Self::MAX
            )))
        } else if !size.is_power_of_two() {
            Err(ConfigError::invalid(format!(
                "block size {size} must be a power of two"
            )))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the block size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Main configuration structure for Porter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker I/O configuration
    pub io: IoConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate values serde could not reject on its own
    pub fn validate(&self) -> ConfigResult<()> {
        BlockSize::new(self.io.block_size.get())?;
        Ok(())
    }
}

/// Worker I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Block size for the read/write loop
    pub block_size: BlockSize,
    /// Whether to issue the best-effort prefetch hint before copying
    pub enable_prefetch: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::default(),
            enable_prefetch: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Env-filter directive, e.g. `info` or `porter_fileops=debug`
    pub level: String,
    /// Emit JSON-structured lines instead of human-readable ones
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}
