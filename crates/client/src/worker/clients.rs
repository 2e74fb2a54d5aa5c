//! Client sessions and the generation controlling each of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

/// Identifier of one client session (an open page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

/// Registry of open client sessions.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    sessions: Arc<RwLock<HashMap<ClientId, Option<String>>>>,
    next_id: Arc<AtomicU64>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, controlled by `controller` if a generation is active.
    pub async fn open(&self, controller: Option<&str>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.write().await.insert(id, controller.map(str::to_string));
        id
    }

    /// Close a session. Returns false if it was not open.
    pub async fn close(&self, id: ClientId) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// The generation controlling `id`, if any.
    pub async fn controller(&self, id: ClientId) -> Option<String> {
        self.sessions.read().await.get(&id).cloned().flatten()
    }

    /// Sessions still controlled by a generation other than `version`.
    pub async fn held_by_others(&self, version: &str) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|c| c.as_deref().is_some_and(|v| v != version))
            .count()
    }

    /// Put every open session under `version`. Returns the number of sessions claimed.
    pub async fn claim(&self, version: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        for controller in sessions.values_mut() {
            *controller = Some(version.to_string());
        }
        sessions.len()
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
