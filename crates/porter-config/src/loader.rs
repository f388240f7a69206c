//! Configuration loading: TOML files layered with environment overrides

use crate::{BlockSize, Config, ConfigError, ConfigResult};
use std::path::Path;
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "PORTER_CONFIG";

/// Loads configuration from files and the environment
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the default configuration
    ///
    /// Starts from built-in defaults, merges the file named by
    /// `PORTER_CONFIG` (when set), then applies `PORTER_*` environment
    /// overrides. A missing file named by the environment is an error; no
    /// environment variable at all is not.
    pub fn load_default() -> ConfigResult<Config> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_file(Path::new(&path))?,
            Err(_) => Config::default(),
        };
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, without environment overrides
    pub fn load_file(path: &Path) -> ConfigResult<Config> {
        debug!("loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
        if let Ok(value) = std::env::var("PORTER_BLOCK_SIZE") {
            let size: usize = value.parse().map_err(|_| {
                ConfigError::invalid(format!("PORTER_BLOCK_SIZE is not a number: '{value}'"))
            })?;
            config.io.block_size = BlockSize::new(size)?;
        }
        if let Ok(value) = std::env::var("PORTER_PREFETCH") {
            config.io.enable_prefetch = parse_bool("PORTER_PREFETCH", &value)?;
        }
        if let Ok(value) = std::env::var("PORTER_LOG_LEVEL") {
            config.logging.level = value;
        }
        if let Ok(value) = std::env::var("PORTER_LOG_JSON") {
            config.logging.json = parse_bool("PORTER_LOG_JSON", &value)?;
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(format!(
            "{name} is not a boolean: '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[io]\nblock_size = 8192\n\n[logging]\nlevel = \"warn\"").unwrap();

        let config = ConfigLoader::load_file(file.path()).unwrap();
        assert_eq!(config.io.block_size.get(), 8192);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_file_rejects_invalid_block_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[io]\nblock_size = 12345").unwrap();

        assert!(matches!(
            ConfigLoader::load_file(file.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        assert!(matches!(
            ConfigLoader::load_file(Path::new("/nonexistent/porter.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[rstest]
    #[case("true", true)]
    #[case("ON", true)]
    #[case("yes", true)]
    #[case("0", false)]
    #[case("off", false)]
    fn test_parse_bool_values(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(parse_bool("X", value).unwrap(), expected);
    }

    #[test]
    fn test_parse_bool_rejects_garbage() {
        assert!(parse_bool("X", "maybe").is_err());
    }
}
