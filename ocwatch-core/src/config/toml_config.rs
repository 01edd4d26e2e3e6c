//! TOML configuration file I/O
//!
//! Resolves where the configuration lives and loads it once at startup.

use crate::config::Config;
use crate::error::{ConfigError, OcwatchError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file name, resolved against the working directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the configuration path
pub const CONFIG_ENV_VAR: &str = "OCWATCH_CONFIG";

/// Get the configuration file path
///
/// An explicit path wins, then `OCWATCH_CONFIG`, then `./config.toml`.
pub fn get_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    PathBuf::from(CONFIG_FILE_NAME)
}

/// Load configuration from a specific TOML file
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<Config, OcwatchError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => OcwatchError::Config(ConfigError::LoadFailed {
            path: path.to_string_lossy().to_string(),
        }),
        _ => OcwatchError::Config(ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        }),
    })?;

    let config = parse_config(&contents)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(contents: &str) -> Result<Config, OcwatchError> {
    let config: Config = toml::from_str(contents).map_err(|e| {
        OcwatchError::Config(ConfigError::ValidationError {
            message: format!("Failed to parse config file: {}", e),
        })
    })?;

    config
        .validate()
        .map_err(|message| OcwatchError::Config(ConfigError::ValidationError { message }))?;

    debug!(
        interval_secs = config.controller.interval_secs,
        health_grace_secs = config.controller.health_check_grace_period_secs,
        source = ?config.controller.credential_source,
        dry_run = config.openconnect.dry_run,
        "Configuration validated"
    );

    Ok(config)
}
