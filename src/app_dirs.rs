//! Locations of the `.labelloop` folder holding the config file and session logs.
//!
//! Resolves under the OS config directory unless `LABELLOOP_CONFIG_HOME` points
//! somewhere else, which tests and portable setups use.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".labelloop";
/// Environment variable replacing the OS config root.
pub const CONFIG_HOME_ENV: &str = "LABELLOOP_CONFIG_HOME";
/// File name of the TOML configuration inside the application directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.labelloop` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    create_dir(base.join(APP_DIR_NAME))
}

/// Return the session log directory, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    create_dir(app_root_dir()?.join("logs"))
}

/// Default location of `config.toml`. The file itself may not exist yet.
pub fn config_file_path() -> Result<PathBuf, AppDirError> {
    Ok(app_root_dir()?.join(CONFIG_FILE_NAME))
}

fn create_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
fn set_config_base_override(path: Option<PathBuf>) {
    let mut guard = CONFIG_BASE_OVERRIDE
        .lock()
        .expect("config base override mutex poisoned");
    *guard = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct OverrideGuard;

    impl OverrideGuard {
        fn set(path: PathBuf) -> Self {
            set_config_base_override(Some(path));
            Self
        }
    }

    impl Drop for OverrideGuard {
        fn drop(&mut self) {
            set_config_base_override(None);
        }
    }

    #[test]
    fn override_anchors_root_logs_and_config() {
        let base = tempdir().unwrap();
        let _guard = OverrideGuard::set(base.path().to_path_buf());
        let root = app_root_dir().unwrap();
        assert_eq!(root, base.path().join(APP_DIR_NAME));
        assert!(root.is_dir());
        assert!(logs_dir().unwrap().is_dir());
        assert_eq!(config_file_path().unwrap(), root.join(CONFIG_FILE_NAME));
    }
}
