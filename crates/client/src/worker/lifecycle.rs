//! Worker lifecycle: install, activate, intercept.
//!
//! Each transition is an awaited async method. A transition is only
//! recorded once all of its work (seed fetches, evictions) has settled.

use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use larder_core::{CacheDb, CachedResponse, Error, GenerationStatus, RequestKey};

use super::clients::Clients;
use super::interceptor::{FetchInterceptor, ResponseSource, Served};
use super::{WorkerConfig, WorkerState};
use crate::fetch::{FetchRequest, Network, resolve};

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// The generation that became current.
    pub version: String,
    /// Stale generations deleted.
    pub evicted: Vec<String>,
    /// Stale generations that survived every eviction attempt.
    pub failed: Vec<String>,
    /// Client sessions now controlled by `version`.
    pub claimed: usize,
}

/// Drives one worker build through its lifecycle.
pub struct LifecycleController {
    store: CacheDb,
    network: Arc<dyn Network>,
    clients: Clients,
    config: WorkerConfig,
    state: WorkerState,
    skip_waiting: bool,
}

impl LifecycleController {
    /// Create a controller, resuming from whatever the store already holds
    /// for this version.
    pub async fn new(
        store: CacheDb, network: Arc<dyn Network>, clients: Clients, config: WorkerConfig,
    ) -> Result<Self, Error> {
        let state = match store.generation(&config.version).await? {
            Some(g) if g.status == GenerationStatus::Active => WorkerState::Active,
            Some(_) => WorkerState::Installed,
            None => WorkerState::Uninstalled,
        };
        tracing::debug!(version = %config.version, %state, "worker created");

        Ok(Self { store, network, clients, config, state, skip_waiting: false })
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Allow activation while sessions are still held by an older generation.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    /// Provision this worker's generation from the seed manifest.
    ///
    /// All seed fetches are joined before anything is written; a single
    /// failure (transport error or non-2xx status) aborts the install, leaves
    /// no new generation behind and marks this worker redundant.
    ///
    /// Returns the number of seeded entries.
    pub async fn install(&mut self) -> Result<usize, Error> {
        if !matches!(self.state, WorkerState::Uninstalled | WorkerState::Redundant) {
            return Err(self.invalid("install"));
        }

        self.state = WorkerState::Installing;
        tracing::info!(version = %self.config.version, seeds = self.config.precache.len(), "installing");

        match self.provision().await {
            Ok(count) => {
                self.state = WorkerState::Installed;
                tracing::info!(version = %self.config.version, entries = count, "installed");
                Ok(count)
            }
            Err(e) => {
                self.state = WorkerState::Redundant;
                tracing::warn!(version = %self.config.version, error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn provision(&self) -> Result<usize, Error> {
        let requests = self
            .config
            .precache
            .iter()
            .map(|path| {
                resolve(&self.config.origin, path)
                    .map(FetchRequest::get)
                    .map_err(|e| Error::ProvisioningFailure(format!("seed {path:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entries = try_join_all(requests.iter().map(|request| self.seed_fetch(request))).await?;

        let existed = self.store.generation(&self.config.version).await?.is_some();
        let generation = self
            .store
            .open_generation(&self.config.version)
            .await
            .map_err(|e| Error::ProvisioningFailure(e.to_string()))?;

        match self.store.seed(&generation, entries).await {
            Ok(count) => Ok(count),
            Err(e) => {
                if !existed && let Err(cleanup) = self.store.delete_generation(&generation.version).await {
                    tracing::warn!(version = %generation.version, error = %cleanup, "failed to drop partial generation");
                }
                Err(Error::ProvisioningFailure(e.to_string()))
            }
        }
    }

    async fn seed_fetch(&self, request: &FetchRequest) -> Result<(RequestKey, CachedResponse), Error> {
        let key = RequestKey::get(request.url.as_str());
        let response = self
            .network
            .send(request)
            .await
            .map_err(|e| Error::ProvisioningFailure(format!("seed {}: {e}", request.url)))?;

        if !response.status.is_success() {
            return Err(Error::ProvisioningFailure(format!(
                "seed {}: status {}",
                request.url,
                response.status.as_u16()
            )));
        }

        Ok((key, response.to_cached()))
    }

    /// Take over: make this generation current, evict every other one and
    /// claim all open sessions.
    ///
    /// Without [`skip_waiting`](Self::skip_waiting), activation is refused
    /// with `ActivationBlocked` while sessions are controlled by another
    /// generation; the worker stays installed and waiting.
    pub async fn activate(&mut self) -> Result<ActivationReport, Error> {
        if self.state != WorkerState::Installed {
            return Err(self.invalid("activate"));
        }

        if !self.skip_waiting {
            let held = self.clients.held_by_others(&self.config.version).await;
            if held > 0 {
                tracing::debug!(version = %self.config.version, held, "waiting for sessions to release");
                return Err(Error::ActivationBlocked(held));
            }
        }

        self.state = WorkerState::Activating;
        tracing::info!(version = %self.config.version, skip_waiting = self.skip_waiting, "activating");

        if let Err(e) = self.store.mark_current(&self.config.version).await {
            self.state = WorkerState::Installed;
            return Err(e);
        }

        let (evicted, failed) = self.evict_stale().await;
        let claimed = self.clients.claim(&self.config.version).await;

        self.state = WorkerState::Active;
        tracing::info!(
            version = %self.config.version,
            evicted = evicted.len(),
            failed = failed.len(),
            claimed,
            "active"
        );

        Ok(ActivationReport { version: self.config.version.clone(), evicted, failed, claimed })
    }

    /// Delete every generation other than the current one.
    ///
    /// Each stale generation is retried on its own; failures are logged and
    /// reported, never fatal.
    async fn evict_stale(&self) -> (Vec<String>, Vec<String>) {
        let stale: Vec<String> = match self.store.list_generations().await {
            Ok(versions) => versions.into_iter().filter(|v| *v != self.config.version).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate generations, skipping eviction");
                return (Vec::new(), Vec::new());
            }
        };

        let results = join_all(stale.into_iter().map(|version| async move {
            let result = self.evict_one(&version).await;
            (version, result)
        }))
        .await;

        let mut evicted = Vec::new();
        let mut failed = Vec::new();
        for (version, result) in results {
            match result {
                Ok(()) => evicted.push(version),
                Err(e) => {
                    tracing::warn!(error = %e, "giving up on stale generation");
                    failed.push(version);
                }
            }
        }
        (evicted, failed)
    }

    async fn finish_eviction(&self) -> Result<(), Error> {
        let current = self.store.current_generation().await?;
        if current.as_deref() != Some(self.config.version.as_str()) {
            tracing::debug!(version = %self.config.version, ?current, "superseded, leaving generations alone");
            return Ok(());
        }

        let (evicted, failed) = self.evict_stale().await;
        if !evicted.is_empty() || !failed.is_empty() {
            tracing::info!(version = %self.config.version, ?evicted, ?failed, "evicted leftover generations");
        }
        Ok(())
    }

    async fn evict_one(&self, version: &str) -> Result<(), Error> {
        let attempts = self.config.eviction_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.store.delete_generation(version).await {
                Ok(_) => {
                    tracing::debug!(version, attempt, "evicted stale generation");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(version, attempt, error = %e, "eviction attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.eviction_backoff).await;
                    }
                }
            }
        }

        Err(Error::EvictionFailure { version: version.to_string(), reason: last_error })
    }

    /// Install if needed, then activate if allowed.
    ///
    /// An already active worker whose generation is still current retries
    /// eviction of any generation left behind by an interrupted or partially
    /// failed activation.
    ///
    /// Returns the resulting state: `Active`, or `Installed` when activation
    /// is still waiting on sessions held by an older generation.
    pub async fn update(&mut self) -> Result<WorkerState, Error> {
        if self.state == WorkerState::Active {
            self.finish_eviction().await?;
            return Ok(self.state);
        }

        if matches!(self.state, WorkerState::Uninstalled | WorkerState::Redundant) {
            self.install().await?;
        }

        if self.state == WorkerState::Installed {
            match self.activate().await {
                Ok(_) | Err(Error::ActivationBlocked(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(self.state)
    }

    /// Interceptor bound to this worker's generation, once active.
    pub fn interceptor(&self) -> Option<FetchInterceptor> {
        (self.state == WorkerState::Active).then(|| {
            FetchInterceptor::new(
                self.store.clone(),
                self.network.clone(),
                self.config.version.clone(),
                self.config.write_through,
            )
        })
    }

    /// Serve a request issued by a client session.
    ///
    /// Until this worker is active, requests go straight to the network.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<Served, Error> {
        match self.interceptor() {
            Some(interceptor) => interceptor.handle(request).await,
            None => {
                let response = self.network.send(request).await?;
                Ok(Served { response, source: ResponseSource::Passthrough })
            }
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition { action, state: self.state.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{StubNetwork, origin};

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig { eviction_backoff: std::time::Duration::from_millis(1), ..WorkerConfig::new(version, origin()) }
    }

    async fn controller(store: &CacheDb, network: &Arc<StubNetwork>, clients: &Clients, version: &str) -> LifecycleController {
        LifecycleController::new(store.clone(), network.clone(), clients.clone(), config(version))
            .await
            .unwrap()
    }

    fn online_network() -> Arc<StubNetwork> {
        let network = Arc::new(StubNetwork::new());
        network.route(origin().as_str(), 200, "<html>home</html>");
        network
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let mut worker = controller(&store, &network, &Clients::new(), "v1").await;
        assert_eq!(worker.state(), WorkerState::Uninstalled);

        assert_eq!(worker.install().await.unwrap(), 1);
        assert_eq!(worker.state(), WorkerState::Installed);

        let report = worker.activate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(report.version, "v1");
        assert!(report.evicted.is_empty());
        assert_eq!(store.current_generation().await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_failed_seed_keeps_previous_generation() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        let mut v1 = controller(&store, &network, &clients, "v1").await;
        v1.update().await.unwrap();

        let menu = origin().join("menu").unwrap();
        network.fail(menu.as_str());
        let mut v2 = LifecycleController::new(
            store.clone(),
            network.clone(),
            clients.clone(),
            WorkerConfig { precache: vec!["/".into(), "/menu".into()], ..config("v2") },
        )
        .await
        .unwrap();

        let result = v2.install().await;
        assert!(matches!(result, Err(Error::ProvisioningFailure(_))));
        assert_eq!(v2.state(), WorkerState::Redundant);
        assert_eq!(store.list_generations().await.unwrap(), vec!["v1".to_string()]);
        assert_eq!(store.current_generation().await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_non_success_seed_fails_install() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(StubNetwork::new());
        network.route(origin().as_str(), 503, "maintenance");
        let mut worker = controller(&store, &network, &Clients::new(), "v1").await;

        assert!(matches!(worker.install().await, Err(Error::ProvisioningFailure(_))));
        assert!(store.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redundant_worker_can_retry_install() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        network.set_offline(true);
        let mut worker = controller(&store, &network, &Clients::new(), "v1").await;
        assert!(worker.install().await.is_err());

        network.set_offline(false);
        assert_eq!(worker.install().await.unwrap(), 1);
        assert_eq!(worker.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_activation_evicts_every_stale_generation() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        controller(&store, &network, &clients, "v1").await.update().await.unwrap();
        store.open_generation("v0").await.unwrap();

        let mut v2 = controller(&store, &network, &clients, "v2").await;
        v2.install().await.unwrap();

        // v1 is untouched until v2 activates
        assert_eq!(store.list_generations().await.unwrap().len(), 3);
        assert!(store.match_entry("v1", &RequestKey::get(origin().as_str())).await.unwrap().is_some());

        let report = v2.activate().await.unwrap();
        let mut evicted = report.evicted.clone();
        evicted.sort();
        assert_eq!(evicted, vec!["v0".to_string(), "v1".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(store.list_generations().await.unwrap(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_update_finishes_interrupted_activation() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        controller(&store, &network, &clients, "v1").await.update().await.unwrap();
        controller(&store, &network, &clients, "v2").await.install().await.unwrap();

        // current flag written, eviction never ran
        store.mark_current("v2").await.unwrap();

        let mut resumed = controller(&store, &network, &clients, "v2").await;
        assert_eq!(resumed.state(), WorkerState::Active);
        assert_eq!(resumed.update().await.unwrap(), WorkerState::Active);
        assert_eq!(store.list_generations().await.unwrap(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_superseded_worker_does_not_evict_current() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        let mut v1 = controller(&store, &network, &clients, "v1").await;
        v1.update().await.unwrap();
        controller(&store, &network, &clients, "v2").await.update().await.unwrap();

        assert_eq!(v1.update().await.unwrap(), WorkerState::Active);
        assert_eq!(store.list_generations().await.unwrap(), vec!["v2".to_string()]);
        assert_eq!(store.current_generation().await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_eviction_failure_is_retried_and_reported() {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir().join(format!("larder-eviction-{}-{nanos}.sqlite", std::process::id()));
        let store = CacheDb::open(&path).await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        controller(&store, &network, &clients, "v1").await.update().await.unwrap();
        store.open_generation("v0").await.unwrap();

        let side = tokio_rusqlite::Connection::open(&path).await.unwrap();
        side.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE eviction_attempts (version TEXT NOT NULL);
                 CREATE TRIGGER pin_v0 BEFORE DELETE ON cache_generations WHEN OLD.version = 'v0'
                 BEGIN
                     INSERT INTO eviction_attempts (version) VALUES (OLD.version);
                     SELECT RAISE(FAIL, 'generation pinned');
                 END;",
            )
        })
        .await
        .unwrap();

        let mut v2 = LifecycleController::new(
            store.clone(),
            network.clone(),
            clients.clone(),
            WorkerConfig { eviction_attempts: 4, ..config("v2") },
        )
        .await
        .unwrap();
        v2.install().await.unwrap();

        let report = v2.activate().await.unwrap();
        assert_eq!(v2.state(), WorkerState::Active);
        assert_eq!(report.evicted, vec!["v1".to_string()]);
        assert_eq!(report.failed, vec!["v0".to_string()]);

        let attempts: i64 = side
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM eviction_attempts", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(attempts, 4);

        // the leftover goes once the next update can delete it
        side.call(|conn| conn.execute_batch("DROP TRIGGER pin_v0;")).await.unwrap();
        assert_eq!(v2.update().await.unwrap(), WorkerState::Active);
        assert_eq!(store.list_generations().await.unwrap(), vec!["v2".to_string()]);

        drop(side);
        drop(store);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn test_waiting_until_sessions_release() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        controller(&store, &network, &clients, "v1").await.update().await.unwrap();
        let page = clients.open(Some("v1")).await;

        let mut v2 = controller(&store, &network, &clients, "v2").await;
        assert_eq!(v2.update().await.unwrap(), WorkerState::Installed);
        assert!(matches!(v2.activate().await, Err(Error::ActivationBlocked(1))));
        assert_eq!(store.current_generation().await.unwrap().as_deref(), Some("v1"));

        clients.close(page).await;
        assert_eq!(v2.update().await.unwrap(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_skip_waiting_claims_sessions() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        controller(&store, &network, &clients, "v1").await.update().await.unwrap();
        let page = clients.open(Some("v1")).await;

        let mut v2 = controller(&store, &network, &clients, "v2").await;
        v2.skip_waiting();
        v2.install().await.unwrap();
        let report = v2.activate().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(clients.controller(page).await.as_deref(), Some("v2"));
        assert_eq!(v2.clients().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let mut worker = controller(&store, &network, &Clients::new(), "v1").await;

        assert!(matches!(worker.activate().await, Err(Error::InvalidTransition { action: "activate", .. })));
        worker.update().await.unwrap();
        assert!(matches!(worker.install().await, Err(Error::InvalidTransition { action: "install", .. })));
    }

    #[tokio::test]
    async fn test_resume_from_store() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let clients = Clients::new();
        let mut worker = controller(&store, &network, &clients, "v1").await;
        worker.install().await.unwrap();

        let resumed = controller(&store, &network, &clients, "v1").await;
        assert_eq!(resumed.state(), WorkerState::Installed);

        worker.activate().await.unwrap();
        let resumed = controller(&store, &network, &clients, "v1").await;
        assert_eq!(resumed.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_handle_fetch_before_and_after_activation() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = online_network();
        let mut worker = controller(&store, &network, &Clients::new(), "v1").await;

        let served = worker.handle_fetch(&FetchRequest::get(origin())).await.unwrap();
        assert_eq!(served.source, ResponseSource::Passthrough);
        assert!(worker.interceptor().is_none());

        worker.update().await.unwrap();
        assert_eq!(worker.interceptor().unwrap().generation(), "v1");
        network.set_offline(true);
        let served = worker.handle_fetch(&FetchRequest::get(origin())).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(&served.response.bytes[..], b"<html>home</html>");
    }
}
