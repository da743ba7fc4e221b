use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::store::schema;

/// Opens the SQLite paper store and brings its schema up to date.
///
/// The schema step runs before the pool is handed out, so every store
/// operation sees the current column set.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    info!("Opening paper store at {database_url}");

    let file = database_file(database_url);
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = match &file {
        Some(_) => {
            let options = options
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        }
        // Each connection to an in-memory database is its own database:
        // pin exactly one connection for the lifetime of the pool.
        None => {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        }
    };

    let migration = schema::migrate(&pool, file.as_deref()).await?;
    if !migration.is_empty() {
        info!("Paper store migrated: {migration}");
    }

    info!("Paper store ready");
    Ok(pool)
}

/// Path of the database file behind a SQLite URL, `None` for in-memory databases.
pub fn database_file(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));

    if path.is_empty() || path == ":memory:" || query.contains("mode=memory") {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
