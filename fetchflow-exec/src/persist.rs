//! Writing fetched items to SQLite in batches.

use std::sync::Arc;

use async_trait::async_trait;
use fetchflow_core::FetchResult;
use fetchflow_store::{BatchProgress, BatchWriter, SqlValue, StoreError};
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Receives the final results of a batch.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns the number of rows written.
    async fn persist(&self, results: &[FetchResult]) -> Result<u64, PersistError>;
}

#[async_trait]
impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    async fn persist(&self, results: &[FetchResult]) -> Result<u64, PersistError> {
        (**self).persist(results).await
    }
}

/// Maps one fetched item (and the result it came from) to statement
/// parameters. Returning `None` skips the item.
pub type RowMapper = dyn Fn(&FetchResult, &Value) -> Option<Vec<SqlValue>> + Send + Sync;

/// Runs one parameterized statement per item of every successful result,
/// chunked into `BEGIN IMMEDIATE` transactions by a [`BatchWriter`].
pub struct BatchRecordSink {
    writer: BatchWriter,
    statement: String,
    mapper: Arc<RowMapper>,
}

impl BatchRecordSink {
    pub fn new(
        writer: BatchWriter,
        statement: impl Into<String>,
        mapper: impl Fn(&FetchResult, &Value) -> Option<Vec<SqlValue>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            writer,
            statement: statement.into(),
            mapper: Arc::new(mapper),
        }
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    fn rows(&self, results: &[FetchResult]) -> Vec<Vec<SqlValue>> {
        results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.items.iter().filter_map(move |item| (self.mapper)(r, item)))
            .collect()
    }
}

#[async_trait]
impl RecordSink for BatchRecordSink {
    async fn persist(&self, results: &[FetchResult]) -> Result<u64, PersistError> {
        let rows = self.rows(results);
        if rows.is_empty() {
            debug!("no items to persist");
            return Ok(0);
        }
        let report = |p: BatchProgress| {
            debug!(batch = p.batch, total_batches = p.total_batches, rows = p.rows, "persisted chunk");
        };
        let written = self.writer.execute_batch(&self.statement, &rows, Some(&report)).await?;
        info!(rows = rows.len(), affected = written, "persisted batch results");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchflow_core::{FetchError, FetchParams, FetchTask};
    use fetchflow_store::{open_pool, PoolConfig, SqliteTuning};
    use serde_json::json;
    use std::time::Duration;

    fn result(source: &str, items: Vec<Value>) -> FetchResult {
        let task = FetchTask::new(0, source, FetchParams::default());
        FetchResult::succeeded(&task, items, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn only_successful_items_become_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("items.db"), PoolConfig::default(), &SqliteTuning::default())
            .await
            .unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            sqlx::query("CREATE TABLE items (source TEXT NOT NULL, id INTEGER NOT NULL, PRIMARY KEY (source, id))")
                .execute(&mut *conn)
                .await
                .unwrap();
            conn.release().await;
        }

        let sink = BatchRecordSink::new(
            BatchWriter::new(pool.clone(), 2),
            "INSERT OR REPLACE INTO items (source, id) VALUES (?1, ?2)",
            |r, item| {
                let id = item.get("id")?.as_i64()?;
                Some(vec![r.source.as_str().into(), id.into()])
            },
        );

        let failed = FetchResult::failed(
            &FetchTask::new(2, "gamma", FetchParams::default()),
            FetchError::transient("down"),
            Duration::ZERO,
        );
        let results = vec![
            result("alpha", vec![json!({"id": 1}), json!({"id": 2}), json!({"no_id": true})]),
            result("beta", vec![json!({"id": 1})]),
            failed,
        ];

        assert_eq!(sink.persist(&results).await.unwrap(), 3);

        let mut conn = pool.acquire().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn nothing_to_write_touches_no_table() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("empty.db"), PoolConfig::default(), &SqliteTuning::default())
            .await
            .unwrap();
        let sink = BatchRecordSink::new(BatchWriter::new(pool, 10), "INSERT INTO missing VALUES (?1)", |_, _| None);
        assert_eq!(sink.persist(&[result("alpha", vec![json!(1)])]).await.unwrap(), 0);
    }
}
