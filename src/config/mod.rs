//! `config.toml` loading and saving.
//!
//! Missing files and missing keys fall back to defaults, so a partial file only
//! needs the values it changes.

use std::path::{Path, PathBuf};

use crate::app_dirs;

mod types;

pub use types::{
    AppConfig, BackendSettings, ConfigError, RetrySettings, SamplingSettings, SessionSettings,
};

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    app_dirs::config_file_path().map_err(map_app_dir_error)
}

/// Load the default config file, returning defaults if it does not exist.
pub fn load_or_default() -> Result<AppConfig, ConfigError> {
    load_from(&config_path()?)
}

/// Load `path`, returning defaults if it does not exist.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    let config = config.normalized();
    config.backend.base_url()?;
    Ok(config)
}

/// Save configuration to a specific path, creating parent directories as needed.
pub fn save_to_path(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::CreateDir { path, source },
    }
}
