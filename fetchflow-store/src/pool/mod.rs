//! Bounded connection pool.
//!
//! At most `max_connections` connections exist at any time: every checked-out
//! connection holds one semaphore slot, and idle connections are only created
//! by a slot holder that found the free list empty. A connection is probed
//! when it comes back; one that fails the probe (or was marked broken) is
//! closed and its slot freed, so it is never handed out again.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::PoolError;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_discarded: u64,
    pub timeouts: u64,
    pub idle: usize,
    pub in_use: usize,
    pub max_connections: usize,
}

/// Opens and probes the connections a [`ConnectionPool`] hands out.
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Cheap liveness probe run when a connection is returned (and, if
    /// enabled, before an idle connection is reused).
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            test_on_checkout: true,
        }
    }
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<M::Connection>>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
}

impl<M: ManageConnection> PoolInner<M> {
    fn pop_idle(&self) -> Option<M::Connection> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    fn discard(&self, conn: M::Connection) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        drop(conn);
    }

    /// Probes `conn` and either parks it on the free list or closes it. The
    /// slot is released only afterwards.
    async fn check_in(&self, mut conn: M::Connection, permit: OwnedSemaphorePermit) {
        if self.slots.is_closed() {
            self.discard(conn);
        } else if self.manager.is_valid(&mut conn).await {
            self.idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(conn);
        } else {
            debug!("discarding connection that failed its health probe");
            self.discard(conn);
        }
        drop(permit);
    }
}

/// Cloneable handle to a bounded pool of `M::Connection`s.
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max = config.max_connections.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                config: PoolConfig {
                    max_connections: max,
                    ..config
                },
                slots: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::with_capacity(max)),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Checks out a connection, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Checks out a connection, waiting at most `timeout` for a free slot.
    /// The pool never retries on the caller's behalf.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let slots = self.inner.slots.clone();
        let permit = match tokio::time::timeout(timeout, slots.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    waited_ms = timeout.as_millis() as u64,
                    max_connections = self.inner.config.max_connections,
                    "connection pool exhausted"
                );
                return Err(PoolError::Timeout { waited: timeout });
            }
        };

        while let Some(mut conn) = self.inner.pop_idle() {
            if self.inner.config.test_on_checkout && !self.inner.manager.is_valid(&mut conn).await {
                debug!("idle connection failed checkout probe");
                self.inner.discard(conn);
                continue;
            }
            self.inner.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConnection::new(conn, permit, self.inner.clone()));
        }

        // On failure the permit drops here and the slot is freed.
        let conn = self.inner.manager.connect().await?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            created = self.inner.created.load(Ordering::Relaxed),
            "opened new pooled connection"
        );
        Ok(PooledConnection::new(conn, permit, self.inner.clone()))
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        let max = self.inner.config.max_connections;
        PoolStats {
            connections_created: self.inner.created.load(Ordering::Relaxed),
            connections_reused: self.inner.reused.load(Ordering::Relaxed),
            connections_discarded: self.inner.discarded.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            idle,
            in_use: max.saturating_sub(self.inner.slots.available_permits()),
            max_connections: max,
        }
    }

    /// Closes every idle connection and rejects further acquisitions.
    /// Checked-out connections are closed when they come back.
    pub fn close(&self) {
        self.inner.slots.close();
        let drained: Vec<M::Connection> = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for conn in drained {
            self.inner.discard(conn);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }
}

/// A checked-out connection. Dereferences to `M::Connection`.
///
/// Prefer [`PooledConnection::release`]; dropping the guard returns the
/// connection from a background task instead.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
    healthy: bool,
}

impl<M: ManageConnection> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("checked_out", &self.conn.is_some())
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(conn: M::Connection, permit: OwnedSemaphorePermit, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            conn: Some(conn),
            permit: Some(permit),
            pool,
            healthy: true,
        }
    }

    /// Flags the connection so it is closed instead of reused.
    pub fn mark_broken(&mut self) {
        self.healthy = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub async fn release(mut self) {
        let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) else {
            return;
        };
        if self.healthy {
            self.pool.check_in(conn, permit).await;
        } else {
            self.pool.discard(conn);
            drop(permit);
        }
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) else {
            return;
        };
        if !self.healthy {
            self.pool.discard(conn);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move { pool.check_in(conn, permit).await });
            }
            Err(_) => self.pool.discard(conn),
        }
    }
}
