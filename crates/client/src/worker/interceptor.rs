//! Network-first fetch interception with cache fallback.
//!
//! Only GET/HEAD requests are intercepted. Everything else goes straight to
//! the network without touching the cache. An eligible request is sent once;
//! on a transport failure the current generation is consulted, and a miss
//! there propagates as `InterceptionMiss`. No retries, no queueing.

use std::sync::Arc;

use larder_core::{CacheDb, Error, RequestKey};

use crate::fetch::{FetchRequest, FetchResponse, Network};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Live network response for an eligible request.
    Network,
    /// Fallback entry from the current generation.
    Cache,
    /// Ineligible request sent without interception.
    Passthrough,
}

/// A response handed back to the application.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: FetchResponse,
    pub source: ResponseSource,
}

/// Per-request decision logic bound to one generation.
#[derive(Clone)]
pub struct FetchInterceptor {
    store: CacheDb,
    network: Arc<dyn Network>,
    generation: String,
    write_through: bool,
}

impl FetchInterceptor {
    pub fn new(store: CacheDb, network: Arc<dyn Network>, generation: impl Into<String>, write_through: bool) -> Self {
        Self { store, network, generation: generation.into(), write_through }
    }

    /// The generation lookups and writes are scoped to.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Serve `request`: network first, current generation on network failure.
    ///
    /// # Errors
    ///
    /// - `Network` for an ineligible request whose network attempt failed
    /// - `InterceptionMiss` for an eligible request with neither network nor cache entry
    pub async fn handle(&self, request: &FetchRequest) -> Result<Served, Error> {
        let Some(key) = request.cache_key() else {
            tracing::debug!(method = %request.method, url = %request.url, "not eligible, passing through");
            let response = self.network.send(request).await?;
            return Ok(Served { response, source: ResponseSource::Passthrough });
        };

        match self.network.send(request).await {
            Ok(response) => {
                if self.write_through && response.status.is_success() {
                    self.write_back(&key, &response).await;
                }
                Ok(Served { response, source: ResponseSource::Network })
            }
            Err(network_err) => self.fallback(request, &key, network_err).await,
        }
    }

    async fn fallback(&self, request: &FetchRequest, key: &RequestKey, network_err: Error) -> Result<Served, Error> {
        let miss = |cause: String| Error::InterceptionMiss { url: request.url.to_string(), cause };

        match self.store.match_entry(&self.generation, key).await {
            Ok(Some(cached)) => match FetchResponse::from_cached(request.url.clone(), cached) {
                Ok(response) => {
                    tracing::debug!(url = %request.url, generation = %self.generation, error = %network_err, "serving from cache");
                    Ok(Served { response, source: ResponseSource::Cache })
                }
                Err(decode_err) => {
                    tracing::warn!(url = %request.url, generation = %self.generation, error = %decode_err, "cached entry unreadable");
                    Err(miss(format!("{network_err}; cached entry unreadable: {decode_err}")))
                }
            },
            Ok(None) => {
                tracing::debug!(url = %request.url, generation = %self.generation, "network failed and cache missed");
                Err(miss(network_err.to_string()))
            }
            Err(lookup_err) => {
                tracing::warn!(url = %request.url, error = %lookup_err, "cache lookup failed");
                Err(miss(format!("{network_err}; cache lookup failed: {lookup_err}")))
            }
        }
    }

    async fn write_back(&self, key: &RequestKey, response: &FetchResponse) {
        if let Err(e) = self.store.put(&self.generation, key, &response.to_cached()).await {
            tracing::warn!(url = key.url(), generation = %self.generation, error = %e, "write-through failed");
        }
    }
}
