use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tracing::info;

use crate::error::{PoolError, StoreError};
use crate::pool::{ConnectionPool, ManageConnection, PoolConfig};

pub type SqlitePool = ConnectionPool<SqliteManager>;

/// One-time settings applied to every new connection.
#[derive(Debug, Clone)]
pub struct SqliteTuning {
    /// How long SQLite itself waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Page cache size in KiB.
    pub cache_size_kib: u32,
}

impl Default for SqliteTuning {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
            cache_size_kib: 64_000,
        }
    }
}

/// Opens tuned SQLite connections for a [`SqlitePool`].
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl SqliteManager {
    pub fn new(path: impl AsRef<Path>, tuning: &SqliteTuning) -> Self {
        let path = path.as_ref().to_path_buf();
        // Negative cache_size is interpreted by SQLite as KiB rather than pages.
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(tuning.busy_timeout)
            .foreign_keys(true)
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", format!("-{}", tuning.cache_size_kib));
        Self { path, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ManageConnection for SqliteManager {
    type Connection = SqliteConnection;

    async fn connect(&self) -> Result<SqliteConnection, PoolError> {
        self.options
            .connect()
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))
    }

    async fn is_valid(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }
}

/// Creates the database directory if needed, builds the pool and proves it
/// can open one connection.
pub async fn open_pool(
    path: impl AsRef<Path>,
    config: PoolConfig,
    tuning: &SqliteTuning,
) -> Result<SqlitePool, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Other(format!("failed to create {}: {e}", parent.display())))?;
        }
    }

    let max_connections = config.max_connections;
    let pool = ConnectionPool::new(SqliteManager::new(path, tuning), config);
    let conn = pool.acquire().await?;
    conn.release().await;

    info!(path = %path.display(), max_connections, "sqlite connection pool ready");
    Ok(pool)
}
