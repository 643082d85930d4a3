use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{
    DEFAULT_FILTER_PAGE_SIZE, LabelingMode, LearnerKind, SamplingStrategy, SessionOptions,
};

pub(super) const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Errors that may occur while loading or saving `config.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid backend URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Settings stored in `config.toml`. Every table is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl AppConfig {
    pub(super) fn normalized(mut self) -> Self {
        self.sampling.filter_page_size = self.sampling.filter_page_size.max(1);
        self.backend.retry.max_attempts = self.backend.retry.max_attempts.max(1);
        if self.backend.retry.max_delay_ms < self.backend.retry.base_delay_ms {
            self.backend.retry.max_delay_ms = self.backend.retry.base_delay_ms;
        }
        self
    }

    /// Session options for a new session in `mode`.
    pub fn session_options(&self, mode: LabelingMode) -> SessionOptions {
        SessionOptions {
            mode,
            learner: self.session.learner,
            initial_strategy: self.sampling.initial_strategy,
            filter_page_size: self.sampling.filter_page_size,
        }
    }
}

/// Connection settings for the learning backend.
///
/// Config keys: `base_url`, `connect_timeout_secs`, `read_timeout_secs`,
/// `max_response_bytes`, `[backend.retry]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Upper bound on any response body, in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl BackendSettings {
    pub fn base_url(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(self.base_url.trim()).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
            retry: RetrySettings::default(),
        }
    }
}

/// Backoff for idempotent backend reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first try.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_filter_page_size")]
    pub filter_page_size: usize,
    #[serde(default)]
    pub initial_strategy: SamplingStrategy,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            filter_page_size: default_filter_page_size(),
            initial_strategy: SamplingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub learner: LearnerKind,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_max_response_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_filter_page_size() -> usize {
    DEFAULT_FILTER_PAGE_SIZE
}
