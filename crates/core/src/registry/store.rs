//! Push subscription and user rows.

use super::UserDirectory;
use crate::Error;
use crate::db::{self, migrations::REGISTRY_MIGRATIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, params};

/// Registry database handle.
#[derive(Clone, Debug)]
pub struct RegistryDb {
    pub(crate) conn: Connection,
}

/// A stored push subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    /// Key material as submitted by the browser (`p256dh`, `auth`, ...).
    pub keys: serde_json::Value,
    pub user_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

type SubscriptionRow = (String, String, Option<i64>, String, String);

fn subscription_from_row(row: SubscriptionRow) -> Result<PushSubscription, Error> {
    let (endpoint, keys_json, user_id, created_at, updated_at) = row;
    Ok(PushSubscription { endpoint, keys: serde_json::from_str(&keys_json)?, user_id, created_at, updated_at })
}

fn read_subscription_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl RegistryDb {
    /// Open a registry database at the specified path, running migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = db::open(Some(path.as_ref()), REGISTRY_MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = db::open(None, REGISTRY_MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Insert or update the subscription for `endpoint`.
    ///
    /// A single `INSERT ... ON CONFLICT` statement keyed by endpoint, so
    /// concurrent registrations of the same endpoint are last-write-wins.
    /// Resubmitting identical key material and owner leaves the row untouched.
    pub async fn upsert_subscription(
        &self, endpoint: &str, keys: &serde_json::Value, user_id: Option<i64>,
    ) -> Result<UpsertOutcome, Error> {
        let endpoint = endpoint.to_string();
        let keys_json = serde_json::to_string(keys)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<UpsertOutcome, Error> {
                let tx = conn.transaction()?;
                let existed: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM push_subscriptions WHERE endpoint = ?1)",
                    params![endpoint],
                    |row| row.get(0),
                )?;

                let changed = tx.execute(
                    "INSERT INTO push_subscriptions (endpoint, keys_json, user_id, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?4)
                    ON CONFLICT(endpoint) DO UPDATE SET
                        keys_json = excluded.keys_json,
                        user_id = excluded.user_id,
                        updated_at = excluded.updated_at
                    WHERE push_subscriptions.keys_json IS NOT excluded.keys_json
                        OR push_subscriptions.user_id IS NOT excluded.user_id",
                    params![endpoint, keys_json, user_id, now],
                )?;
                tx.commit()?;

                Ok(match (existed, changed) {
                    (false, _) => UpsertOutcome::Created,
                    (true, 0) => UpsertOutcome::Unchanged,
                    (true, _) => UpsertOutcome::Updated,
                })
            })
            .await
            .map_err(Error::from)
    }

    /// Get the subscription stored for `endpoint`.
    pub async fn get_subscription(&self, endpoint: &str) -> Result<Option<PushSubscription>, Error> {
        let endpoint = endpoint.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PushSubscription>, Error> {
                let row = conn
                    .query_row(
                        "SELECT endpoint, keys_json, user_id, created_at, updated_at
                        FROM push_subscriptions WHERE endpoint = ?1",
                        params![endpoint],
                        read_subscription_row,
                    )
                    .optional()?;
                row.map(subscription_from_row).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// All subscriptions bound to `user_id`, oldest first.
    pub async fn subscriptions_for_user(&self, user_id: i64) -> Result<Vec<PushSubscription>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<PushSubscription>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT endpoint, keys_json, user_id, created_at, updated_at
                    FROM push_subscriptions WHERE user_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![user_id], read_subscription_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(subscription_from_row).collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Remove the subscription for `endpoint`, e.g. once the push provider reports it gone.
    ///
    /// Returns false if nothing was stored for it.
    pub async fn delete_subscription(&self, endpoint: &str) -> Result<bool, Error> {
        let endpoint = endpoint.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM push_subscriptions WHERE endpoint = ?1", params![endpoint])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored subscriptions.
    pub async fn count_subscriptions(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM push_subscriptions", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert a user and return its id. An existing username returns the existing id.
    pub async fn add_user(&self, username: &str) -> Result<i64, Error> {
        let username = username.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO users (username, created_at) VALUES (?1, ?2) ON CONFLICT(username) DO NOTHING",
                    params![username, now],
                )?;
                let id = conn.query_row("SELECT id FROM users WHERE username = ?1", params![username], |row| row.get(0))?;
                Ok(id)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a user id by username.
    pub async fn find_user(&self, username: &str) -> Result<Option<i64>, Error> {
        let username = username.to_string();
        self.conn
            .call(move |conn| -> Result<Option<i64>, Error> {
                let id = conn
                    .query_row("SELECT id FROM users WHERE username = ?1", params![username], |row| row.get(0))
                    .optional()?;
                Ok(id)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait::async_trait]
impl UserDirectory for RegistryDb {
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, Error> {
        self.find_user(username).await
    }
}
