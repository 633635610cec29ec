use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fetchflow_store::{ConnectionPool, ManageConnection, PoolConfig, PoolError};

#[derive(Default)]
struct Counters {
    next_id: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    bad: Mutex<HashSet<usize>>,
}

struct MockConn {
    id: usize,
    counters: Arc<Counters>,
}

impl Drop for MockConn {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct MockManager {
    counters: Arc<Counters>,
}

impl MockManager {
    fn poison(&self, id: usize) {
        self.counters.bad.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl ManageConnection for MockManager {
    type Connection = MockConn;

    async fn connect(&self) -> Result<MockConn, PoolError> {
        let id = self.counters.next_id.fetch_add(1, Ordering::SeqCst);
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(MockConn {
            id,
            counters: self.counters.clone(),
        })
    }

    async fn is_valid(&self, conn: &mut MockConn) -> bool {
        !self.counters.bad.lock().unwrap().contains(&conn.id)
    }
}

fn pool(max: usize) -> (ConnectionPool<MockManager>, MockManager) {
    let manager = MockManager::default();
    let pool = ConnectionPool::new(
        manager.clone(),
        PoolConfig {
            max_connections: max,
            acquire_timeout: Duration::from_secs(5),
            test_on_checkout: true,
        },
    );
    (pool, manager)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_max_connections() {
    let (pool, manager) = pool(3);
    let held = Arc::new(AtomicUsize::new(0));
    let peak_held = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        let held = held.clone();
        let peak_held = peak_held.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            let now = held.fetch_add(1, Ordering::SeqCst) + 1;
            peak_held.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            held.fetch_sub(1, Ordering::SeqCst);
            conn.release().await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(peak_held.load(Ordering::SeqCst) <= 3);
    assert!(manager.counters.peak_open.load(Ordering::SeqCst) <= 3);
    let stats = pool.stats();
    assert!(stats.connections_created <= 3);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn acquire_on_full_pool_times_out() {
    let (pool, _) = pool(2);
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();

    let start = Instant::now();
    let err = pool.acquire_timeout(Duration::from_millis(200)).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, PoolError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(190), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "hung: {elapsed:?}");
    assert_eq!(pool.stats().timeouts, 1);

    a.release().await;
    b.release().await;
}

#[tokio::test]
async fn released_connection_is_reused() {
    let (pool, _) = pool(2);
    let conn = pool.acquire().await.unwrap();
    let id = conn.id;
    conn.release().await;

    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id, id);
    let stats = pool.stats();
    assert_eq!(stats.connections_created, 1);
    assert_eq!(stats.connections_reused, 1);
    again.release().await;
}

#[tokio::test]
async fn connection_failing_probe_is_never_handed_out_again() {
    let (pool, manager) = pool(2);
    let conn = pool.acquire().await.unwrap();
    let id = conn.id;
    manager.poison(id);
    conn.release().await;

    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().connections_discarded, 1);
    assert_eq!(manager.counters.open.load(Ordering::SeqCst), 0);

    let next = pool.acquire().await.unwrap();
    assert_ne!(next.id, id);
    next.release().await;
}

#[tokio::test]
async fn idle_connection_failing_checkout_probe_is_replaced() {
    let (pool, manager) = pool(2);
    let conn = pool.acquire().await.unwrap();
    let id = conn.id;
    conn.release().await;
    assert_eq!(pool.stats().idle, 1);

    manager.poison(id);
    let next = pool.acquire().await.unwrap();
    assert_ne!(next.id, id);
    assert_eq!(pool.stats().connections_discarded, 1);
    next.release().await;
}

#[tokio::test]
async fn broken_connection_is_discarded() {
    let (pool, manager) = pool(1);
    let mut conn = pool.acquire().await.unwrap();
    conn.mark_broken();
    assert!(!conn.is_healthy());
    assert_eq!(format!("{conn:?}"), "PooledConnection { checked_out: true, healthy: false, .. }");
    conn.release().await;

    assert_eq!(pool.stats().idle, 0);
    assert_eq!(manager.counters.open.load(Ordering::SeqCst), 0);
    // The slot was freed.
    let next = pool.acquire_timeout(Duration::from_millis(100)).await.unwrap();
    next.release().await;
}

#[tokio::test]
async fn dropped_connection_returns_in_background() {
    let (pool, _) = pool(1);
    let conn = pool.acquire().await.unwrap();
    drop(conn);

    let again = pool.acquire_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(pool.stats().connections_created, 1);
    again.release().await;
}

#[tokio::test]
async fn closed_pool_rejects_acquire() {
    let (pool, manager) = pool(2);
    let conn = pool.acquire().await.unwrap();
    conn.release().await;

    pool.close();
    assert!(pool.is_closed());
    assert_eq!(manager.counters.open.load(Ordering::SeqCst), 0);
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
}
