//! `BEGIN IMMEDIATE` transactions with bounded retry on a busy database.

use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{is_store_busy, StoreError};
use crate::pool::PooledConnection;
use crate::sqlite::{SqliteManager, SqlitePool};

/// Backoff applied when `BEGIN IMMEDIATE` reports the database busy.
#[derive(Debug, Clone)]
pub struct LockRetry {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl LockRetry {
    /// No retries: a busy database fails on the first attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, with full jitter over
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32, rand_u64: impl Fn() -> u64) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let raw_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(1u64 << exp)
            .min(self.max_delay.as_millis() as u64);
        let jitter_ms = if raw_ms == 0 { 0 } else { rand_u64() % (raw_ms + 1) };
        Duration::from_millis(jitter_ms)
    }
}

/// An open write transaction on a pooled connection.
///
/// Dropping it without [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// closes the connection, which makes SQLite roll back.
pub struct ImmediateTransaction {
    conn: Option<PooledConnection<SqliteManager>>,
}

impl ImmediateTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self.conn.as_mut() {
            Some(conn) => &mut **conn,
            None => unreachable!("transaction used after completion"),
        }
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(err) = sqlx::query("COMMIT").execute(&mut *conn).await {
            if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                conn.mark_broken();
            }
            conn.release().await;
            return Err(err.into());
        }
        conn.release().await;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let res = sqlx::query("ROLLBACK").execute(&mut *conn).await;
        if res.is_err() {
            conn.mark_broken();
        }
        conn.release().await;
        res.map(|_| ()).map_err(StoreError::from)
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            warn!("transaction dropped while open; closing its connection");
            conn.mark_broken();
        }
    }
}

/// Acquires a connection and starts a `BEGIN IMMEDIATE` transaction on it,
/// retrying with backoff while the database is busy. The same connection is
/// kept across retries.
pub async fn begin_immediate(pool: &SqlitePool, retry: &LockRetry) -> Result<ImmediateTransaction, StoreError> {
    let mut conn = pool.acquire().await?;
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            Ok(_) => return Ok(ImmediateTransaction { conn: Some(conn) }),
            Err(err) if is_store_busy(&err) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, "database still locked; giving up");
                    conn.release().await;
                    return Err(StoreError::Locked { attempts: attempt });
                }
                let delay = retry.delay_for(attempt, || fastrand::u64(..));
                debug!(attempt, delay_ms = delay.as_millis() as u64, "database busy; retrying BEGIN IMMEDIATE");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                conn.release().await;
                return Err(err.into());
            }
        }
    }
}

/// Runs `f` inside an immediate transaction: commits on `Ok`, rolls back on
/// `Err` and returns the closure's error.
///
/// ```ignore
/// let n = with_transaction(&pool, &LockRetry::default(), |conn| {
///     Box::pin(async move {
///         let done = sqlx::query("DELETE FROM fetched_items").execute(conn).await?;
///         Ok(done.rows_affected())
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F>(pool: &SqlitePool, retry: &LockRetry, f: F) -> Result<T, StoreError>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, StoreError>>,
{
    let mut tx = begin_immediate(pool, retry).await?;
    match f(tx.conn()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let retry = LockRetry::default();
        let max = || u64::MAX;
        // rand % (raw + 1) with rand = u64::MAX lands at or below raw.
        assert!(retry.delay_for(1, max) <= Duration::from_millis(100));
        assert!(retry.delay_for(3, max) <= Duration::from_millis(400));
        assert!(retry.delay_for(30, max) <= Duration::from_secs(2));
        assert_eq!(retry.delay_for(2, || 200), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2, || 0), Duration::ZERO);
    }

    #[test]
    fn none_means_single_attempt() {
        assert_eq!(LockRetry::none().max_attempts, 1);
    }
}
