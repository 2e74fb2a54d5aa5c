//! Core types and shared functionality for larder.
//!
//! This crate provides:
//! - Versioned cache generations with SQLite backend
//! - Push subscription registry storage and idempotent registration
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod registry;

pub use cache::{CacheDb, CachedResponse, Generation, GenerationStatus, RequestKey};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use registry::{RegisterRequest, Registration, RegistryDb, SubscriptionRegistry, UpsertOutcome};
