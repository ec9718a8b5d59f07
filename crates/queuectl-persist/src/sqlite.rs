//! SQLite connection setup

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use queuectl_queue::QueueError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite configuration options
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:queue.db" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL journal mode for better concurrency
    pub wal_mode: bool,
    /// How long a connection waits on another writer's lock
    pub busy_timeout_secs: u64,
    /// Create the database file if it does not exist
    pub create_if_missing: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:queue.db".to_string(),
            max_connections: 5,
            wal_mode: true,
            busy_timeout_secs: 10,
            create_if_missing: true,
        }
    }
}

impl SqliteConfig {
    /// Config for a database file at `path`
    pub fn file(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            url: format!("sqlite:{}", path.as_ref().display()),
            ..Default::default()
        }
    }

    /// Create config for in-memory database (testing).
    /// One connection only: every in-memory connection is its own database.
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            busy_timeout_secs: 5,
            create_if_missing: true,
        }
    }
}

/// Open a pool and bring the schema up to date
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool, QueueError> {
    let mut options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| QueueError::Backend(format!("invalid database url: {}", e)))?
        .create_if_missing(config.create_if_missing)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    if config.wal_mode {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| QueueError::Backend(format!("connection failed: {}", e)))?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Migration failed: {}", e)))?;

    info!(url = %config.url, wal = config.wal_mode, "Connected to SQLite");
    Ok(pool)
}
