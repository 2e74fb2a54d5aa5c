//! Request identity for cached entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Methods whose requests are safe to serve from the cache.
const CACHEABLE_METHODS: &[&str] = &["GET", "HEAD"];

/// Whether requests with `method` may be read from or written to the cache.
pub fn is_cacheable_method(method: &str) -> bool {
    CACHEABLE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Identity of a cached request: upper-cased method plus canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Build a key for `method` and an already canonical `url`.
    ///
    /// Returns `None` for methods that must never touch the cache.
    pub fn new(method: &str, url: &str) -> Option<Self> {
        is_cacheable_method(method).then(|| Self { method: method.to_ascii_uppercase(), url: url.to_string() })
    }

    /// Shorthand for a GET key.
    pub fn get(url: &str) -> Self {
        Self { method: "GET".into(), url: url.to_string() }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// SHA-256 hex digest used as the primary key inside a generation.
    pub fn hash(&self) -> String {
        compute_request_hash(&self.method, &self.url)
    }
}

/// Compute the storage hash for a request identity.
pub fn compute_request_hash(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
