//! SQLite-backed store of versioned cache generations.
//!
//! A generation is a named snapshot of (request identity → response) pairs.
//! Exactly one generation may be marked current; the rest are stale and get
//! evicted when a newer generation activates.
//!
//! - Request identity is a SHA-256 of method and canonical URL
//! - Deleting a generation cascades to its entries in one statement
//! - WAL mode lets overlapping fetches read and write concurrently

pub mod key;
pub mod store;

pub use crate::Error;

pub use key::{RequestKey, is_cacheable_method};
pub use store::{CacheDb, CachedResponse, Generation, GenerationStatus};
