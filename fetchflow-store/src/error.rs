use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for a pooled connection")]
    Timeout { waited: Duration },
    #[error("failed to open connection: {0}")]
    Connect(String),
    #[error("connection pool is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("store still locked after {attempts} attempts")]
    Locked { attempts: u32 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Other(String),
}

/// True when SQLite reported `SQLITE_BUSY` or `SQLITE_LOCKED` (including
/// their extended codes).
pub fn is_store_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    if let Some(code) = db.code() {
        if let Ok(n) = code.parse::<i32>() {
            let primary = n & 0xff;
            return primary == 5 || primary == 6;
        }
    }
    let msg = db.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}
