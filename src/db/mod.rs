/// Database layer for the revocation ledger
///
/// Manages connection pools and embedded migrations for the SQLite and
/// PostgreSQL backends.

pub mod postgres;

use crate::error::{ResponderError, ResponderResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// SQLite connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

impl DatabaseOptions {
    /// Every connection to `:memory:` opens its own empty database, so
    /// in-memory URLs are pinned to a single connection.
    pub fn for_url(url: &str) -> Self {
        if is_memory_url(url) {
            Self {
                max_connections: 1,
                enable_wal: false,
            }
        } else {
            Self::default()
        }
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Create a SQLite connection pool from a `sqlite:` URL
pub async fn create_pool(url: &str, options: DatabaseOptions) -> ResponderResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(url)
        .map_err(|e| ResponderError::Config(format!("Invalid SQLite URL {}: {}", url, e)))?
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    // Ensure parent directory exists
    if !is_memory_url(url) {
        if let Some(parent) = connect_options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Run migrations for a SQLite database
/// Migrations are embedded at compile time from ./migrations/sqlite
pub async fn run_migrations(pool: &SqlitePool) -> ResponderResult<()> {
    sqlx::migrate!("./migrations/sqlite")
        .run(pool)
        .await
        .map_err(|e| ResponderError::Internal(format!("Migration failed: {}", e)))?;

    info!("SQLite revocation ledger is up to date");
    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> ResponderResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
