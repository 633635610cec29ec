use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fetchflow_core::ResultStatus;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::executor::{Event, EventSink};

#[derive(Debug, Clone, Default)]
pub struct BatchMetrics {
    pub batch_id: Option<Uuid>,
    pub started_at: Option<Instant>,
    pub wall_time: Option<Duration>,
    pub tasks_started: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_rejected: usize,
    pub tasks_invalid: usize,
    pub retries: usize,
    pub items: usize,
    pub fetch_time: Duration,
    pub cancelled: bool,
}

impl BatchMetrics {
    pub fn start(&mut self, batch_id: Uuid) {
        *self = BatchMetrics {
            batch_id: Some(batch_id),
            started_at: Some(Instant::now()),
            ..Default::default()
        };
    }

    pub fn record_task_started(&mut self) {
        self.tasks_started += 1;
    }

    pub fn record_task_finished(&mut self, status: ResultStatus, items: usize, duration: Duration) {
        match status {
            ResultStatus::Succeeded => {
                self.tasks_succeeded += 1;
                self.items += items;
            }
            ResultStatus::Failed => self.tasks_failed += 1,
            ResultStatus::Rejected => self.tasks_rejected += 1,
            ResultStatus::Invalid => self.tasks_invalid += 1,
        }
        self.fetch_time += duration;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.wall_time = self.started_at.map(|s| s.elapsed());
    }

    /// Finished tasks (including attempts later retried) per second of wall time.
    pub fn throughput(&self) -> f64 {
        let finished = self.tasks_succeeded + self.tasks_failed + self.tasks_rejected + self.tasks_invalid;
        match self.wall_time {
            Some(d) if !d.is_zero() => finished as f64 / d.as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "batch_id": self.batch_id.map(|id| id.to_string()),
            "wall_time_ms": self.wall_time.map(|d| d.as_millis() as u64),
            "cancelled": self.cancelled,
            "tasks": {
                "started": self.tasks_started,
                "succeeded": self.tasks_succeeded,
                "failed": self.tasks_failed,
                "rejected": self.tasks_rejected,
                "invalid": self.tasks_invalid,
                "retried": self.retries,
            },
            "items": self.items,
            "fetch_time_ms": self.fetch_time.as_millis() as u64,
            "tasks_per_second": self.throughput(),
        })
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    metrics: Mutex<BatchMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_metrics(&self) -> BatchMetrics {
        self.metrics.lock().await.clone()
    }

    async fn apply(&self, event: &Event) {
        let mut m = self.metrics.lock().await;
        match event {
            Event::BatchStarted { batch_id, .. } => m.start(*batch_id),
            Event::TaskStarted { .. } => m.record_task_started(),
            Event::TaskFinished { status, items, duration, .. } => {
                m.record_task_finished(*status, *items, *duration)
            }
            Event::RetryScheduled { .. } => m.record_retry(),
            Event::BatchFinished { .. } => m.finish(false),
            Event::BatchCancelled { .. } => m.finish(true),
            Event::Progress { .. } | Event::RetryPassStarted { .. } => {}
        }
    }
}

/// Feeds a [`MetricsCollector`] and forwards every event to `base`.
pub struct MetricsEventSink {
    collector: Arc<MetricsCollector>,
    base: Arc<dyn EventSink>,
}

impl MetricsEventSink {
    pub fn new(collector: Arc<MetricsCollector>, base: Arc<dyn EventSink>) -> Self {
        Self { collector, base }
    }
}

#[async_trait]
impl EventSink for MetricsEventSink {
    async fn emit(&self, event: Event) {
        self.collector.apply(&event).await;
        self.base.emit(event).await;
    }
}
