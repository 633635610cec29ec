//! The `fetched_items` table the CLI writes to with `--db`.

use fetchflow_core::FetchResult;
use fetchflow_exec::persist::BatchRecordSink;
use fetchflow_store::{BatchWriter, LockRetry, SqlValue, SqlitePool, StoreError};
use serde_json::Value;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS fetched_items (
    source TEXT NOT NULL,
    item_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (source, item_key)
)";

const UPSERT: &str = "INSERT INTO fetched_items (source, item_key, payload, fetched_at) VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(source, item_key) DO UPDATE SET payload = excluded.payload, fetched_at = excluded.fetched_at";

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let mut conn = pool.acquire().await?;
    let created = sqlx::query(CREATE_TABLE).execute(&mut *conn).await;
    conn.release().await;
    created?;
    Ok(())
}

/// Null items carry no payload and are not stored.
fn item_row(result: &FetchResult, item: &Value) -> Option<Vec<SqlValue>> {
    if item.is_null() {
        return None;
    }
    Some(vec![
        result.source.as_str().into(),
        crate::utils::item_key(item).into(),
        item.to_string().into(),
        chrono::Utc::now().to_rfc3339().into(),
    ])
}

pub fn record_sink(pool: SqlitePool, batch_size: usize, retry: LockRetry) -> BatchRecordSink {
    BatchRecordSink::new(BatchWriter::new(pool, batch_size).with_lock_retry(retry), UPSERT, item_row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchflow_core::{FetchParams, FetchTask};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn rows_are_keyed_by_source_and_item() {
        let task = FetchTask::new(0, "rust", FetchParams::default());
        let result = FetchResult::succeeded(&task, vec![], Duration::ZERO);

        let row = item_row(&result, &json!({"id": 7, "title": "x"})).unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], SqlValue::Text("rust".into()));
        assert_eq!(row[1], SqlValue::Text("7".into()));
        assert_eq!(row[2], SqlValue::Text(r#"{"id":7,"title":"x"}"#.into()));

        assert_eq!(item_row(&result, &Value::Null), None);
    }
}
