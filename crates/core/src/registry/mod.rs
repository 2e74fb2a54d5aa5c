//! Server-side registry of push delivery endpoints.
//!
//! Registration is an idempotent upsert keyed by endpoint. The owning user
//! is resolved by username through a [`UserDirectory`]; an unknown username
//! stores the subscription without an owner instead of rejecting it.

pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;

pub use store::{PushSubscription, RegistryDb, UpsertOutcome};

/// Resolves human-readable usernames to user ids.
///
/// The user store belongs to the surrounding application; the registry only reads it.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, Error>;
}

/// Registration payload as submitted by a client.
///
/// Required fields are optional here so that absence can be reported as
/// `InvalidSubscription` rather than a decoding failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub keys: Option<serde_json::Value>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub endpoint: String,
    pub user_id: Option<i64>,
    pub outcome: UpsertOutcome,
}

/// Idempotent push subscription registry.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    db: RegistryDb,
    users: Arc<dyn UserDirectory>,
}

impl SubscriptionRegistry {
    /// Registry whose owners are resolved from the registry database's own users table.
    pub fn new(db: RegistryDb) -> Self {
        let users = Arc::new(db.clone());
        Self { db, users }
    }

    /// Registry resolving owners through an external user directory.
    pub fn with_directory(db: RegistryDb, users: Arc<dyn UserDirectory>) -> Self {
        Self { db, users }
    }

    pub fn db(&self) -> &RegistryDb {
        &self.db
    }

    /// Register (or re-register) a push subscription.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscription` if `endpoint` is missing/blank or `keys` is missing or not an object.
    ///   Nothing is written.
    /// - `RegistrationFailed` if storage fails. Owner lookup failures degrade to ownerless.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration, Error> {
        let endpoint = match request.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
            _ => return Err(Error::InvalidSubscription("endpoint is required".into())),
        };
        let keys = match request.keys {
            Some(keys @ serde_json::Value::Object(_)) => keys,
            Some(serde_json::Value::Null) | None => {
                return Err(Error::InvalidSubscription("keys are required".into()));
            }
            Some(_) => return Err(Error::InvalidSubscription("keys must be an object".into())),
        };

        let user_id = match request.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(username) => self.resolve_owner(username).await,
            None => None,
        };

        let outcome = self
            .db
            .upsert_subscription(&endpoint, &keys, user_id)
            .await
            .map_err(|e| Error::RegistrationFailed(e.to_string()))?;

        tracing::info!(endpoint = %endpoint, ?user_id, ?outcome, "registered push subscription");

        Ok(Registration { endpoint, user_id, outcome })
    }

    /// Drop the subscription for an endpoint the push provider reported as gone.
    pub async fn unregister(&self, endpoint: &str) -> Result<bool, Error> {
        let removed = self.db.delete_subscription(endpoint).await?;
        if removed {
            tracing::info!(endpoint, "removed push subscription");
        }
        Ok(removed)
    }

    pub async fn get(&self, endpoint: &str) -> Result<Option<PushSubscription>, Error> {
        self.db.get_subscription(endpoint).await
    }

    pub async fn for_user(&self, user_id: i64) -> Result<Vec<PushSubscription>, Error> {
        self.db.subscriptions_for_user(user_id).await
    }

    pub async fn count(&self) -> Result<u64, Error> {
        self.db.count_subscriptions().await
    }

    async fn resolve_owner(&self, username: &str) -> Option<i64> {
        match self.users.find_user_id(username).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                tracing::warn!(username, "unknown subscription owner, storing without owner");
                None
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "owner lookup failed, storing without owner");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(endpoint: Option<&str>, keys: Option<serde_json::Value>, username: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            endpoint: endpoint.map(str::to_string),
            keys,
            username: username.map(str::to_string),
        }
    }

    struct BrokenDirectory;

    #[async_trait::async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn find_user_id(&self, _username: &str) -> Result<Option<i64>, Error> {
            Err(Error::Network("user service unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let db = RegistryDb::open_in_memory().await.unwrap();
        let alice = db.add_user("alice").await.unwrap();
        let registry = SubscriptionRegistry::new(db);
        let keys = json!({"p256dh": "BPk", "auth": "a1"});

        let first = registry
            .register(request(Some("https://push.test/e1"), Some(keys.clone()), Some("alice")))
            .await
            .unwrap();
        let stored_first = registry.get("https://push.test/e1").await.unwrap().unwrap();

        let second = registry
            .register(request(Some("https://push.test/e1"), Some(keys), Some("alice")))
            .await
            .unwrap();
        let stored_second = registry.get("https://push.test/e1").await.unwrap().unwrap();

        assert_eq!(first.outcome, UpsertOutcome::Created);
        assert_eq!(second.outcome, UpsertOutcome::Unchanged);
        assert_eq!(first.user_id, Some(alice));
        assert_eq!(stored_first, stored_second);
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_does_not_block() {
        let registry = SubscriptionRegistry::new(RegistryDb::open_in_memory().await.unwrap());

        let registration = registry
            .register(request(Some("https://push.test/e2"), Some(json!({"auth": "x"})), Some("nonexistent-user")))
            .await
            .unwrap();

        assert_eq!(registration.user_id, None);
        let stored = registry.get("https://push.test/e2").await.unwrap().unwrap();
        assert_eq!(stored.user_id, None);
    }

    #[tokio::test]
    async fn test_directory_failure_degrades_to_ownerless() {
        let db = RegistryDb::open_in_memory().await.unwrap();
        let registry = SubscriptionRegistry::with_directory(db, Arc::new(BrokenDirectory));

        let registration = registry
            .register(request(Some("https://push.test/e3"), Some(json!({"auth": "x"})), Some("alice")))
            .await
            .unwrap();

        assert_eq!(registration.user_id, None);
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_without_write() {
        let registry = SubscriptionRegistry::new(RegistryDb::open_in_memory().await.unwrap());

        let no_endpoint = registry.register(request(None, Some(json!({"auth": "x"})), None)).await;
        let blank_endpoint = registry.register(request(Some("  "), Some(json!({"auth": "x"})), None)).await;
        let no_keys = registry.register(request(Some("e"), None, None)).await;
        let null_keys = registry.register(request(Some("e"), Some(serde_json::Value::Null), None)).await;
        let string_keys = registry.register(request(Some("e"), Some(json!("abc")), None)).await;

        for result in [no_endpoint, blank_endpoint, no_keys, null_keys, string_keys] {
            assert!(matches!(result, Err(Error::InvalidSubscription(_))), "{result:?}");
        }
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resubmission_rebinds_owner() {
        let db = RegistryDb::open_in_memory().await.unwrap();
        let alice = db.add_user("alice").await.unwrap();
        let bob = db.add_user("bob").await.unwrap();
        let registry = SubscriptionRegistry::new(db);
        let keys = json!({"auth": "x"});

        registry
            .register(request(Some("https://push.test/shared"), Some(keys.clone()), Some("alice")))
            .await
            .unwrap();
        let second = registry
            .register(request(Some("https://push.test/shared"), Some(keys), Some("bob")))
            .await
            .unwrap();

        assert_eq!(second.outcome, UpsertOutcome::Updated);
        assert!(registry.for_user(alice).await.unwrap().is_empty());
        assert_eq!(registry.for_user(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_endpoints() {
        let registry = SubscriptionRegistry::new(RegistryDb::open_in_memory().await.unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register(request(Some(&format!("https://push.test/c{i}")), Some(json!({"auth": i})), None))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(registry.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = SubscriptionRegistry::new(RegistryDb::open_in_memory().await.unwrap());
        registry
            .register(request(Some("https://push.test/gone"), Some(json!({"auth": "x"})), None))
            .await
            .unwrap();

        assert!(registry.unregister("https://push.test/gone").await.unwrap());
        assert_eq!(registry.count().await.unwrap(), 0);
    }
}
