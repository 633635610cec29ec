use std::sync::Mutex;
use std::time::Duration;

use fetchflow_store::{
    begin_immediate, open_pool, with_transaction, BatchProgress, BatchWriter, LockRetry, PoolConfig, SqlValue,
    SqlitePool, SqliteTuning, StoreError,
};

async fn open(dir: &tempfile::TempDir, busy_timeout: Duration) -> SqlitePool {
    let tuning = SqliteTuning {
        busy_timeout,
        ..SqliteTuning::default()
    };
    open_pool(dir.path().join("store.db"), PoolConfig::default(), &tuning)
        .await
        .unwrap()
}

async fn create_items(pool: &SqlitePool) {
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("CREATE TABLE IF NOT EXISTS items (k TEXT PRIMARY KEY, v INTEGER NOT NULL)")
        .execute(&mut *conn)
        .await
        .unwrap();
    conn.release().await;
}

async fn count_items(pool: &SqlitePool) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    conn.release().await;
    n
}

fn rows(n: usize) -> Vec<Vec<SqlValue>> {
    (0..n)
        .map(|i| vec![SqlValue::from(format!("k{i}")), SqlValue::from(i as i64)])
        .collect()
}

const UPSERT: &str = "INSERT INTO items (k, v) VALUES (?1, ?2) ON CONFLICT(k) DO UPDATE SET v = excluded.v";

#[tokio::test]
async fn new_connections_are_tuned() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    let mut conn = pool.acquire().await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    let sync: i64 = sqlx::query_scalar("PRAGMA synchronous").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(sync, 1);
    let temp_store: i64 = sqlx::query_scalar("PRAGMA temp_store").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(temp_store, 2);
    let cache: i64 = sqlx::query_scalar("PRAGMA cache_size").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(cache, -64000);
    let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(fk, 1);
    let busy: i64 = sqlx::query_scalar("PRAGMA busy_timeout").fetch_one(&mut *conn).await.unwrap();
    assert_eq!(busy, 5000);

    conn.release().await;
}

#[tokio::test]
async fn open_pool_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("store.db");
    let pool = open_pool(&path, PoolConfig::default(), &SqliteTuning::default())
        .await
        .unwrap();
    assert!(path.exists());
    assert_eq!(pool.stats().connections_created, 1);
}

#[tokio::test]
async fn transaction_commits_on_ok() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    let inserted = with_transaction(&pool, &LockRetry::default(), |conn| {
        Box::pin(async move {
            let a = sqlx::query(UPSERT).bind("a").bind(1i64).execute(&mut *conn).await?;
            let b = sqlx::query(UPSERT).bind("b").bind(2i64).execute(&mut *conn).await?;
            Ok::<_, StoreError>(a.rows_affected() + b.rows_affected())
        })
    })
    .await
    .unwrap();

    assert_eq!(inserted, 2);
    assert_eq!(count_items(&pool).await, 2);
    assert_eq!(pool.stats().in_use, 0);
}

#[tokio::test]
async fn transaction_rolls_back_and_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    let err = with_transaction(&pool, &LockRetry::default(), |conn| {
        Box::pin(async move {
            sqlx::query(UPSERT).bind("a").bind(1i64).execute(&mut *conn).await?;
            Err::<(), _>(StoreError::Other("boom".into()))
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, StoreError::Other(ref m) if m == "boom"));
    assert_eq!(count_items(&pool).await, 0);
    assert_eq!(pool.stats().in_use, 0);
}

#[tokio::test]
async fn dropped_transaction_leaves_no_writes() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    {
        let mut tx = begin_immediate(&pool, &LockRetry::default()).await.unwrap();
        sqlx::query(UPSERT).bind("a").bind(1i64).execute(tx.conn()).await.unwrap();
    }

    assert_eq!(count_items(&pool).await, 0);
}

#[tokio::test]
async fn busy_store_gives_up_after_bounded_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let writer = open(&dir, Duration::from_millis(20)).await;
    create_items(&writer).await;
    let other = open(&dir, Duration::from_millis(20)).await;

    let held = begin_immediate(&writer, &LockRetry::default()).await.unwrap();

    let retry = LockRetry {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    };
    let err = begin_immediate(&other, &retry).await.err().unwrap();
    assert!(matches!(err, StoreError::Locked { attempts: 3 }), "{err:?}");
    assert_eq!(other.stats().in_use, 0);

    held.rollback().await.unwrap();
}

#[tokio::test]
async fn busy_store_is_retried_until_lock_frees() {
    let dir = tempfile::tempdir().unwrap();
    let writer = open(&dir, Duration::from_millis(20)).await;
    create_items(&writer).await;
    let other = open(&dir, Duration::from_millis(20)).await;

    let held = begin_immediate(&writer, &LockRetry::default()).await.unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        held.commit().await.unwrap();
    });

    let retry = LockRetry {
        max_attempts: 20,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
    };
    let n = with_transaction(&other, &retry, |conn| {
        Box::pin(async move {
            let done = sqlx::query(UPSERT).bind("late").bind(7i64).execute(&mut *conn).await?;
            Ok::<_, StoreError>(done.rows_affected())
        })
    })
    .await
    .unwrap();

    release.await.unwrap();
    assert_eq!(n, 1);
    assert_eq!(count_items(&writer).await, 1);
}

#[tokio::test]
async fn batch_writer_chunks_and_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    let seen = Mutex::new(Vec::new());
    let cb: &(dyn Fn(BatchProgress) + Send + Sync) = &|p| seen.lock().unwrap().push(p);
    let writer = BatchWriter::new(pool.clone(), 10);
    let total = writer.execute_batch(UPSERT, &rows(25), Some(cb)).await.unwrap();

    assert_eq!(total, 25);
    assert_eq!(count_items(&pool).await, 25);
    let seen = seen.into_inner().unwrap();
    assert_eq!(
        seen,
        vec![
            BatchProgress { batch: 1, total_batches: 3, rows: 10 },
            BatchProgress { batch: 2, total_batches: 3, rows: 20 },
            BatchProgress { batch: 3, total_batches: 3, rows: 25 },
        ]
    );
}

#[tokio::test]
async fn batch_upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    let writer = BatchWriter::new(pool.clone(), 7);
    let first = writer.execute_batch(UPSERT, &rows(30), None).await.unwrap();
    let second = writer.execute_batch(UPSERT, &rows(30), None).await.unwrap();

    assert_eq!(first, 30);
    assert_eq!(first, second);
    assert_eq!(count_items(&pool).await, 30);
}

#[tokio::test]
async fn failing_chunk_rolls_back_and_keeps_earlier_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    create_items(&pool).await;

    let mut data = rows(20);
    // v is NOT NULL.
    data[15][1] = SqlValue::Null;

    let writer = BatchWriter::new(pool.clone(), 10);
    let err = writer.execute_batch(UPSERT, &data, None).await.unwrap_err();

    assert!(matches!(err, StoreError::Database(_)));
    assert_eq!(count_items(&pool).await, 10);
    assert_eq!(pool.stats().in_use, 0);
}

#[tokio::test]
async fn empty_batch_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir, Duration::from_secs(5)).await;
    let writer = BatchWriter::new(pool.clone(), 10);
    assert_eq!(writer.execute_batch(UPSERT, &[], None).await.unwrap(), 0);
}
