#![forbid(unsafe_code)]

pub mod batch;
pub mod error;
pub mod pool;
pub mod sqlite;
pub mod transaction;

pub use crate::batch::{BatchProgress, BatchWriter, SqlValue};
pub use crate::error::{is_store_busy, PoolError, StoreError};
pub use crate::pool::{ConnectionPool, ManageConnection, PoolConfig, PoolStats, PooledConnection};
pub use crate::sqlite::{open_pool, SqliteManager, SqlitePool, SqliteTuning};
pub use crate::transaction::{begin_immediate, with_transaction, ImmediateTransaction, LockRetry};
