use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::sqlite::SqlitePool;
use crate::transaction::{begin_immediate, LockRetry};

/// A bindable column value for [`BatchWriter`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Reported after each committed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based index of the chunk just committed.
    pub batch: usize,
    pub total_batches: usize,
    /// Rows affected so far, across all committed chunks.
    pub rows: u64,
}

/// Writes rows in fixed-size chunks, one immediate transaction per chunk.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    pool: SqlitePool,
    batch_size: usize,
    retry: LockRetry,
}

impl BatchWriter {
    pub fn new(pool: SqlitePool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            retry: LockRetry::default(),
        }
    }

    pub fn with_lock_retry(mut self, retry: LockRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Executes `sql` once per row and returns the total affected-row count.
    ///
    /// A failing chunk is rolled back and its error returned; chunks committed
    /// before it stay committed.
    pub async fn execute_batch(
        &self,
        sql: &str,
        rows: &[Vec<SqlValue>],
        progress: Option<&(dyn Fn(BatchProgress) + Send + Sync)>,
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let total_batches = rows.len().div_ceil(self.batch_size);
        let mut total = 0u64;

        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            let mut tx = begin_immediate(&self.pool, &self.retry).await?;
            let mut affected = 0u64;
            let mut failure = None;
            for row in chunk {
                match bind_row(sqlx::query(sql), row).execute(tx.conn()).await {
                    Ok(done) => affected += done.rows_affected(),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = failure {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, batch = i + 1, "rollback failed");
                }
                return Err(err.into());
            }
            tx.commit().await?;

            total += affected;
            debug!(batch = i + 1, total_batches, rows = affected, "committed batch chunk");
            if let Some(cb) = progress {
                cb(BatchProgress {
                    batch: i + 1,
                    total_batches,
                    rows: total,
                });
            }
        }
        Ok(total)
    }
}

fn bind_row<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    row: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in row {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}
