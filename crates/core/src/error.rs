//! Unified error types for larder.
//!
//! Every variant renders with an upper-case code prefix.

use tokio_rusqlite::rusqlite;

/// Unified error types shared by the cache agent and the subscription registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A seed fetch failed while provisioning a generation.
    ///
    /// Fatal to the rollout attempt; the previous generation stays current.
    #[error("PROVISIONING_FAILED: {0}")]
    ProvisioningFailure(String),

    /// A stale generation could not be deleted during activation.
    #[error("EVICTION_FAILED: {version}: {reason}")]
    EvictionFailure { version: String, reason: String },

    /// Neither the network nor the current generation satisfied an eligible request.
    #[error("INTERCEPTION_MISS: {url}: {cause}")]
    InterceptionMiss { url: String, cause: String },

    /// Registration payload is missing a required field.
    #[error("INVALID_SUBSCRIPTION: {0}")]
    InvalidSubscription(String),

    /// Storage failed while upserting a subscription.
    #[error("REGISTRATION_FAILED: {0}")]
    RegistrationFailed(String),

    /// Transport-level failure (DNS, refused connection, timeout, offline).
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Lifecycle method called from a state that does not allow it.
    #[error("INVALID_TRANSITION: cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    /// Activation refused because sessions are still controlled by another generation.
    #[error("ACTIVATION_BLOCKED: {0} client session(s) still controlled by a previous generation")]
    ActivationBlocked(usize),

    /// Missing or wrong registry credentials.
    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt row: {0}")]
    Corrupt(String),
}

impl Error {
    /// The upper-case code this error renders with.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ProvisioningFailure(_) => "PROVISIONING_FAILED",
            Error::EvictionFailure { .. } => "EVICTION_FAILED",
            Error::InterceptionMiss { .. } => "INTERCEPTION_MISS",
            Error::InvalidSubscription(_) => "INVALID_SUBSCRIPTION",
            Error::RegistrationFailed(_) => "REGISTRATION_FAILED",
            Error::Network(_) => "NETWORK_ERROR",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::ActivationBlocked(_) => "ACTIVATION_BLOCKED",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Database(_) | Error::MigrationFailed(_) | Error::Corrupt(_) => "CACHE_ERROR",
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}
