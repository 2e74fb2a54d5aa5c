//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use super::migrations::{self, Migration};
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;
     PRAGMA busy_timeout=5000;";

/// Open a database at `path`, or in memory when `path` is `None`.
///
/// Creates the file if it doesn't exist, applies performance pragmas,
/// and runs any pending migrations from `set`.
pub async fn open(path: Option<&Path>, set: &'static [Migration]) -> Result<Connection, Error> {
    let conn = match path {
        Some(path) => Connection::open(path).await,
        None => Connection::open_in_memory().await,
    }
    .map_err(|e| Error::Database(e.into()))?;

    conn.call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
    })
    .await
    .map_err(Error::Database)?;

    migrations::run(&conn, set).await?;

    Ok(conn)
}
