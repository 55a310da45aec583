//! YAML configuration loading for the prediction service.
//!
//! Loads [`ServiceConfig`] from a YAML file on disk, falling back to defaults
//! when no file is specified.

use cancelrisk_core::ServiceConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "CANCELRISK_CONFIG";

/// Load and validate a [`ServiceConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the YAML is invalid, or the
/// configuration is inconsistent (bad threshold, bad schema).
pub fn load_config(path: &Path) -> anyhow::Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: ServiceConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    config.validate()?;
    Ok(config)
}

/// Pick the configuration path: the first CLI argument, then
/// `CANCELRISK_CONFIG`, else none (defaults).
pub fn config_path_from_env(first_arg: Option<String>) -> Option<PathBuf> {
    first_arg
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}
