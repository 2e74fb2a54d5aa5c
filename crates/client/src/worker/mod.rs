//! The offline cache agent.
//!
//! A [`LifecycleController`] moves one cache generation through
//! install → activate and then hands eligible requests to a
//! [`FetchInterceptor`]: network first, the current generation on failure.
//! Client sessions are tracked in [`Clients`] so activation knows when a
//! previous generation is still in use.

pub mod clients;
pub mod interceptor;
pub mod lifecycle;

use std::fmt;
use std::time::Duration;

use larder_core::{AppConfig, Error};
use reqwest::Url;

pub use clients::{ClientId, Clients};
pub use interceptor::{FetchInterceptor, ResponseSource, Served};
pub use lifecycle::{ActivationReport, LifecycleController};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninstalled,
    Installing,
    /// Installed and waiting for the previous generation to be released.
    Installed,
    Activating,
    Active,
    /// Install failed; the previous generation is still in charge.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Settings for one worker build.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Generation tag this worker provisions.
    pub version: String,
    /// Origin that seed paths resolve against.
    pub origin: Url,
    /// Seed manifest; must contain the root document.
    pub precache: Vec<String>,
    /// Store fresh 2xx network responses in the current generation.
    pub write_through: bool,
    /// Attempts per stale generation during eviction.
    pub eviction_attempts: u32,
    /// Fixed pause between eviction attempts.
    pub eviction_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(version: impl Into<String>, origin: Url) -> Self {
        Self {
            version: version.into(),
            origin,
            precache: vec!["/".into()],
            write_through: true,
            eviction_attempts: 3,
            eviction_backoff: Duration::from_millis(50),
        }
    }

    pub fn from_app(config: &AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.origin)))?;
        Ok(Self {
            precache: config.precache.clone(),
            write_through: config.write_through,
            eviction_attempts: config.eviction_attempts,
            ..Self::new(config.cache_version.clone(), origin)
        })
    }
}
