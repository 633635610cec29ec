use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fetchflow_core::{BatchSummary, FetchError, FetchResult, ResultStatus};
use futures_util::FutureExt;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fetcher::panic_message;

#[derive(Debug, Clone)]
pub enum Event {
    BatchStarted {
        batch_id: Uuid,
        total: usize,
        strategy: &'static str,
    },
    TaskStarted {
        batch_id: Uuid,
        task_id: String,
        source: String,
        attempt: u32,
    },
    TaskFinished {
        batch_id: Uuid,
        task_id: String,
        source: String,
        attempt: u32,
        status: ResultStatus,
        items: usize,
        duration: Duration,
        error: Option<FetchError>,
    },
    Progress {
        batch_id: Uuid,
        completed: usize,
        total: usize,
    },
    RetryPassStarted {
        batch_id: Uuid,
        tasks: usize,
    },
    RetryScheduled {
        batch_id: Uuid,
        task_id: String,
        source: String,
        delay: Duration,
    },
    BatchFinished {
        batch_id: Uuid,
        summary: BatchSummary,
    },
    BatchCancelled {
        batch_id: Uuid,
        completed: usize,
        total: usize,
    },
}

impl Event {
    pub(crate) fn task_finished(batch_id: Uuid, result: &FetchResult) -> Self {
        Event::TaskFinished {
            batch_id,
            task_id: result.task_id.clone(),
            source: result.source.clone(),
            attempt: result.attempt,
            status: result.status(),
            items: result.item_count(),
            duration: result.duration,
            error: result.error.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::BatchStarted { .. } => "batch.started",
            Event::TaskStarted { .. } => "task.started",
            Event::TaskFinished { .. } => "task.finished",
            Event::Progress { .. } => "batch.progress",
            Event::RetryPassStarted { .. } => "retry_pass.started",
            Event::RetryScheduled { .. } => "retry.scheduled",
            Event::BatchFinished { .. } => "batch.finished",
            Event::BatchCancelled { .. } => "batch.cancelled",
        }
    }

    pub fn batch_id(&self) -> Uuid {
        match self {
            Event::BatchStarted { batch_id, .. }
            | Event::TaskStarted { batch_id, .. }
            | Event::TaskFinished { batch_id, .. }
            | Event::Progress { batch_id, .. }
            | Event::RetryPassStarted { batch_id, .. }
            | Event::RetryScheduled { batch_id, .. }
            | Event::BatchFinished { batch_id, .. }
            | Event::BatchCancelled { batch_id, .. } => *batch_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let ty = self.name();
        let batch_id = self.batch_id().to_string();
        match self {
            Event::BatchStarted { total, strategy, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "total": total, "strategy": strategy })
            }
            Event::TaskStarted { task_id, source, attempt, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "task_id": task_id, "source": source, "attempt": attempt })
            }
            Event::TaskFinished { task_id, source, attempt, status, items, duration, error, .. } => {
                json!({
                    "type": ty,
                    "batch_id": batch_id,
                    "task_id": task_id,
                    "source": source,
                    "attempt": attempt,
                    "status": status.as_str(),
                    "items": items,
                    "duration_ms": duration.as_millis() as u64,
                    "error": error,
                })
            }
            Event::Progress { completed, total, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "completed": completed, "total": total })
            }
            Event::RetryPassStarted { tasks, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "tasks": tasks })
            }
            Event::RetryScheduled { task_id, source, delay, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "task_id": task_id, "source": source, "delay_ms": delay.as_millis() as u64 })
            }
            Event::BatchFinished { summary, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "summary": summary })
            }
            Event::BatchCancelled { completed, total, .. } => {
                json!({ "type": ty, "batch_id": batch_id, "completed": completed, "total": total })
            }
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    async fn emit(&self, event: Event) {
        (**self).emit(event).await
    }
}

/// Delivers `event`, logging instead of unwinding if the sink panics.
pub(crate) async fn emit_guarded(sink: &dyn EventSink, event: Event) {
    let name = event.name();
    if let Err(payload) = AssertUnwindSafe(sink.emit(event)).catch_unwind().await {
        warn!(event = name, panic = %panic_message(payload.as_ref()), "event sink panicked");
    }
}

pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Default for CompositeEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.add(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// One JSON object per line on stdout.
pub struct StdoutEventSink;

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit(&self, event: Event) {
        println!("{}", serde_json::to_string(&event.to_json()).unwrap_or_default());
    }
}

/// Structured `tracing` records.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: Event) {
        match &event {
            Event::BatchStarted { batch_id, total, strategy } => {
                info!(%batch_id, total, strategy, "batch started");
            }
            Event::TaskStarted { task_id, source, attempt, .. } => {
                debug!(task_id, source, attempt, "task started");
            }
            Event::TaskFinished { task_id, source, attempt, status, items, duration, error, .. } => {
                if let Some(error) = error {
                    warn!(task_id, source, attempt, status = status.as_str(), error = %error, "task failed");
                } else {
                    debug!(task_id, source, attempt, items, duration_ms = duration.as_millis() as u64, "task succeeded");
                }
            }
            Event::Progress { completed, total, .. } => {
                debug!(completed, total, "progress");
            }
            Event::RetryPassStarted { tasks, .. } => {
                info!(tasks, "retrying failed tasks");
            }
            Event::RetryScheduled { task_id, delay, .. } => {
                info!(task_id, delay_ms = delay.as_millis() as u64, "retry scheduled");
            }
            Event::BatchFinished { batch_id, summary } => {
                info!(
                    %batch_id,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    rejected = summary.rejected,
                    total_items = summary.total_items,
                    "batch finished"
                );
            }
            Event::BatchCancelled { batch_id, completed, total } => {
                warn!(%batch_id, completed, total, "batch cancelled");
            }
        }
    }
}

pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: Event) {}
}

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Calls a plain `(completed, total)` closure for every progress event.
/// A panicking callback is logged and otherwise ignored.
pub struct ProgressCallback {
    callback: Box<ProgressFn>,
}

impl ProgressCallback {
    pub fn new(callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl EventSink for ProgressCallback {
    async fn emit(&self, event: Event) {
        if let Event::Progress { completed, total, .. } = event {
            let callback = &self.callback;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(completed, total)));
            if outcome.is_err() {
                warn!(completed, total, "progress callback panicked");
            }
        }
    }
}
