use chrono::{DateTime, Utc};
use fetchflow_core::{BatchSummary, FetchResult};
use serde::Serialize;
use uuid::Uuid;

use crate::persist::PersistError;

/// Everything one batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<FetchResult>,
    pub summary: BatchSummary,
    pub persisted_rows: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("batch cancelled after {completed} of {total} tasks")]
    Cancelled { completed: usize, total: usize },
    #[error("persisting results failed: {0}")]
    Persist(#[from] PersistError),
    #[error("invalid orchestrator configuration: {0}")]
    Config(String),
}
