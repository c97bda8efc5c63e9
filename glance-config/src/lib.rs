//! Loader for Glance settings with environment + optional file overlays.
//!
//! Environment variables win: `GLANCE_X_BEARER_TOKEN`, `GLANCE_YOUTUBE_API_KEY`,
//! `GLANCE_CACHE_DIR`, `GLANCE_DEFAULT_POST_LIMIT`, `GLANCE_USER_TTL_SECS`.
//! A missing microblogging credential fails at load time, before any client
//! exists and before any network call can happen.

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Bearer token for the microblogging API. Required.
    #[serde(default)]
    pub x_bearer_token: String,
    /// API key for the video platform. Only the channel commands need it.
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Default pull size per timeline fetch; kept low to spare the quota.
    #[serde(default = "default_post_limit")]
    pub default_post_limit: usize,
    #[serde(default = "default_user_ttl_secs")]
    pub user_ttl_secs: u64,
}

impl Settings {
    pub fn require_video_key(&self) -> Result<&str, ConfigError> {
        match self.youtube_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredential("GLANCE_YOUTUBE_API_KEY")),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_post_limit() -> usize {
    20
}

fn default_user_ttl_secs() -> u64 {
    3600
}

/// Builder hiding the `config` crate wiring (env overlay + optional file).
pub struct SettingsLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        let builder = Config::builder().add_source(Environment::with_prefix("GLANCE"));
        Self { builder }
    }

    /// Attach a settings file; absent files are simply skipped.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline TOML snippet (tests and CLI overrides).
    pub fn with_toml_str(mut self, toml: &str) -> Self {
        self.builder = self.builder.add_source(File::from_str(toml, FileFormat::Toml));
        self
    }

    pub fn load(self) -> Result<Settings, ConfigError> {
        let settings: Settings = self.builder.build()?.try_deserialize()?;
        if settings.x_bearer_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential("GLANCE_X_BEARER_TOKEN"));
        }
        Ok(settings)
    }
}
