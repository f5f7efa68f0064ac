//! Configuration loader from ~/.grading-sandbox.json.

use std::path::{Path, PathBuf};

use crate::config::schema::SandboxConfiguration;
use crate::error::{ConfigError, SandboxError};
use crate::utils::absolutize;

/// Default settings file name.
const DEFAULT_SETTINGS_FILE: &str = ".grading-sandbox.json";

/// Get the default settings file path.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_SETTINGS_FILE))
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<SandboxConfiguration, SandboxError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()).into());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("Failed to read config file: {}", e))
    })?;

    parse_config(&content)
}

/// Load configuration from the default path, or return default config if not found.
pub fn load_default_config() -> Result<SandboxConfiguration, SandboxError> {
    match default_settings_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(SandboxConfiguration::default()),
    }
}

/// Parse configuration from a JSON string.
///
/// A relative execution root is resolved against the current directory.
pub fn parse_config(json: &str) -> Result<SandboxConfiguration, SandboxError> {
    let mut config: SandboxConfiguration = serde_json::from_str(json).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse config JSON: {}", e))
    })?;

    config.execution_root = absolutize(&config.execution_root).map_err(|e| {
        ConfigError::ValidationError(format!(
            "Invalid execution root '{}': {}",
            config.execution_root.display(),
            e
        ))
    })?;

    // Validate the configuration
    config.validate()?;

    Ok(config)
}
