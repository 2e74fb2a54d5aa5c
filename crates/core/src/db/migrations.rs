//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each migration is a SQL batch that transforms the schema.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// A single migration: (version, SQL).
///
/// Versions are incrementing integers within one migration set.
pub type Migration = (i64, &'static str);

/// Schema for the client-side cache database.
pub const CACHE_MIGRATIONS: &[Migration] = &[(1, include_str!("../../migrations/001_cache_generations.sql"))];

/// Schema for the server-side registry database.
pub const REGISTRY_MIGRATIONS: &[Migration] = &[(1, include_str!("../../migrations/002_push_subscriptions.sql"))];

/// Run any pending migrations from `set`.
///
/// This creates the _migrations table if it doesn't exist, checks the
/// current version, and applies any migrations that haven't been run yet.
/// Each migration runs in its own transaction together with its version row.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute or versions are out of order.
pub async fn run(conn: &Connection, set: &'static [Migration]) -> Result<(), Error> {
    conn.call(move |conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(Error::from)?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
            .map_err(Error::from)?;

        let mut previous = 0;
        for (version, sql) in set {
            if *version <= previous {
                return Err(Error::MigrationFailed(format!("version {version} out of order")));
            }
            previous = *version;

            if *version > current {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                tracing::debug!(version, "applied migration");
            }
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
