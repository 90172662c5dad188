use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

use crate::error::MetadataResult;

/// Opens the SQLite pool, creating the database file when missing.
pub async fn connect(database_url: &str) -> MetadataResult<SqlitePool> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(connect_opts)
        .await?;

    info!(database_url, "SQLite pool initialized");
    Ok(pool)
}
