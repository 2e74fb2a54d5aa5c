//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (LARDER_*)
//! 2. TOML config file (if LARDER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (LARDER_*)
/// 2. TOML config file (if LARDER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the client-side SQLite cache database.
    ///
    /// Set via LARDER_CACHE_DB_PATH environment variable.
    #[serde(default = "default_cache_db_path")]
    pub cache_db_path: PathBuf,

    /// Path to the server-side subscription registry database.
    ///
    /// Set via LARDER_REGISTRY_DB_PATH environment variable.
    #[serde(default = "default_registry_db_path")]
    pub registry_db_path: PathBuf,

    /// Version tag of the cache generation this build provisions.
    ///
    /// Changing it triggers a new install on the next update.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Origin that relative seed paths and request paths resolve against.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Seed manifest fetched at install time. Must include the root document.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Store fresh 2xx network responses in the current generation.
    #[serde(default = "default_true")]
    pub write_through: bool,

    /// Attempts per stale generation when evicting during activation.
    #[serde(default = "default_eviction_attempts")]
    pub eviction_attempts: u32,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via LARDER_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Socket address the registry server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Registry endpoint the client submits subscriptions to.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Shared bearer token required by the registry endpoint when set.
    ///
    /// Set via LARDER_REGISTRY_TOKEN environment variable.
    #[serde(default)]
    pub registry_token: Option<String>,
}

fn default_cache_db_path() -> PathBuf {
    PathBuf::from("./larder-cache.sqlite")
}

fn default_registry_db_path() -> PathBuf {
    PathBuf::from("./larder-registry.sqlite")
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_origin() -> String {
    "http://localhost:5173".into()
}

fn default_precache() -> Vec<String> {
    vec!["/".into()]
}

fn default_true() -> bool {
    true
}

fn default_eviction_attempts() -> u32 {
    3
}

fn default_user_agent() -> String {
    "larder/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".into()
}

fn default_registry_url() -> String {
    "http://127.0.0.1:3000/api/push/subscribe".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_db_path: default_cache_db_path(),
            registry_db_path: default_registry_db_path(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            precache: default_precache(),
            write_through: true,
            eviction_attempts: default_eviction_attempts(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            bind_addr: default_bind_addr(),
            registry_url: default_registry_url(),
            registry_token: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `LARDER_`
    /// 2. TOML file from `LARDER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("LARDER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment.merge(
            Env::prefixed("LARDER_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        ))
    }

    /// Extract and validate a configuration from an assembled figment.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Registry token, if the endpoint should require one.
    pub fn registry_token(&self) -> Option<&str> {
        self.registry_token.as_deref().filter(|t| !t.is_empty())
    }
}
