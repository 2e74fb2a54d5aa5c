//! Generation and entry operations.
//!
//! Every mutation goes through the narrow interface here: open, seed, put,
//! match, list, mark current, delete.

use super::key::RequestKey;
use crate::Error;
use crate::db::{self, migrations::CACHE_MIGRATIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, params};

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. Cloning is cheap and shares the connection.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

/// Whether a generation is the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Installed,
    Active,
}

impl GenerationStatus {
    fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Installed => "installed",
            GenerationStatus::Active => "active",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "installed" => Ok(GenerationStatus::Installed),
            "active" => Ok(GenerationStatus::Active),
            other => Err(Error::Corrupt(format!("unknown generation status {other:?}"))),
        }
    }
}

/// A versioned cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub version: String,
    pub status: GenerationStatus,
    pub created_at: String,
    pub activated_at: Option<String>,
}

/// A response snapshot stored inside a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// URL the response was finally served from (after redirects).
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cached_at: String,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

type GenerationRow = (String, String, String, Option<String>);

fn generation_from_row(row: GenerationRow) -> Result<Generation, Error> {
    let (version, status, created_at, activated_at) = row;
    Ok(Generation { version, status: GenerationStatus::parse(&status)?, created_at, activated_at })
}

fn insert_entry(
    conn: &rusqlite::Connection, version: &str, key: &RequestKey, response: &CachedResponse,
) -> Result<(), Error> {
    let headers_json = serde_json::to_string(&response.headers)?;
    conn.execute(
        "INSERT INTO cache_entries (
            generation, key_hash, method, url, final_url, status_code, headers_json, body, cached_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(generation, key_hash) DO UPDATE SET
            final_url = excluded.final_url,
            status_code = excluded.status_code,
            headers_json = excluded.headers_json,
            body = excluded.body,
            cached_at = excluded.cached_at",
        params![
            version,
            key.hash(),
            key.method(),
            key.url(),
            &response.url,
            response.status,
            headers_json,
            &response.body,
            &response.cached_at,
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Open a cache database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = db::open(Some(path.as_ref()), CACHE_MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = db::open(None, CACHE_MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open (or create) the generation tagged `version`.
    ///
    /// An existing generation is returned untouched, including its status.
    pub async fn open_generation(&self, version: &str) -> Result<Generation, Error> {
        let version = version.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Generation, Error> {
                conn.execute(
                    "INSERT INTO cache_generations (version, status, created_at) VALUES (?1, 'installed', ?2)
                    ON CONFLICT(version) DO NOTHING",
                    params![version, now],
                )?;
                let row: GenerationRow = conn.query_row(
                    "SELECT version, status, created_at, activated_at FROM cache_generations WHERE version = ?1",
                    params![version],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;
                generation_from_row(row)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a generation without creating it.
    pub async fn generation(&self, version: &str) -> Result<Option<Generation>, Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Generation>, Error> {
                let row: Option<GenerationRow> = conn
                    .query_row(
                        "SELECT version, status, created_at, activated_at FROM cache_generations WHERE version = ?1",
                        params![version],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                row.map(generation_from_row).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Write all seed entries into `generation` in a single transaction.
    ///
    /// Either every entry lands or none does. Returns the number of entries written.
    pub async fn seed(&self, generation: &Generation, entries: Vec<(RequestKey, CachedResponse)>) -> Result<usize, Error> {
        let version = generation.version.clone();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                for (key, response) in &entries {
                    insert_entry(&tx, &version, key, response)?;
                }
                tx.commit()?;
                Ok(entries.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a single entry in the generation tagged `version`.
    ///
    /// Fails if the generation does not exist.
    pub async fn put(&self, version: &str, key: &RequestKey, response: &CachedResponse) -> Result<(), Error> {
        let version = version.to_string();
        let key = key.clone();
        let response = response.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> { insert_entry(conn, &version, &key, &response) })
            .await
            .map_err(Error::from)
    }

    /// Find the entry for `key` inside the generation tagged `version`.
    ///
    /// Lookups never cross generations.
    pub async fn match_entry(&self, version: &str, key: &RequestKey) -> Result<Option<CachedResponse>, Error> {
        let version = version.to_string();
        let key_hash = key.hash();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let row: Option<(String, u16, String, Vec<u8>, String)> = conn
                    .query_row(
                        "SELECT final_url, status_code, headers_json, body, cached_at
                        FROM cache_entries WHERE generation = ?1 AND key_hash = ?2",
                        params![version, key_hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;

                match row {
                    Some((url, status, headers_json, body, cached_at)) => {
                        let headers = serde_json::from_str(&headers_json)?;
                        Ok(Some(CachedResponse { url, status, headers, body, cached_at }))
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// List all generation tags, oldest first.
    pub async fn list_generations(&self) -> Result<Vec<String>, Error> {
        Ok(self.generations().await?.into_iter().map(|g| g.version).collect())
    }

    /// List all generations with their status, oldest first.
    pub async fn generations(&self) -> Result<Vec<Generation>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<Generation>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT version, status, created_at, activated_at FROM cache_generations
                    ORDER BY created_at ASC, version ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                    .collect::<Result<Vec<GenerationRow>, _>>()?;
                rows.into_iter().map(generation_from_row).collect()
            })
            .await
            .map_err(Error::from)
    }

    /// The tag of the current generation, if one has been activated.
    pub async fn current_generation(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let version = conn
                    .query_row("SELECT version FROM cache_generations WHERE status = 'active'", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(version)
            })
            .await
            .map_err(Error::from)
    }

    /// Make `version` the single current generation.
    ///
    /// Any previously current generation is demoted in the same transaction.
    pub async fn mark_current(&self, version: &str) -> Result<(), Error> {
        let version = version.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE cache_generations SET status = ?1 WHERE status = ?2 AND version != ?3",
                    params![GenerationStatus::Installed.as_str(), GenerationStatus::Active.as_str(), version],
                )?;
                let updated = tx.execute(
                    "UPDATE cache_generations SET status = ?1, activated_at = COALESCE(activated_at, ?2)
                    WHERE version = ?3",
                    params![GenerationStatus::Active.as_str(), now, version],
                )?;
                if updated == 0 {
                    return Err(Error::Corrupt(format!("generation {version} does not exist")));
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the generation tagged `version` together with all its entries.
    ///
    /// Returns false if no such generation existed.
    pub async fn delete_generation(&self, version: &str) -> Result<bool, Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM cache_generations WHERE version = ?1", params![version])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries stored in the generation tagged `version`.
    pub async fn entry_count(&self, version: &str) -> Result<u64, Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE generation = ?1", params![version], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
