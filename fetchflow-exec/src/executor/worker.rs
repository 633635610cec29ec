use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fetchflow_core::{FetchError, FetchResult, FetchTask, Validate};
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::executor::events::emit_guarded;
use crate::executor::{Event, EventSink};
use crate::fetcher::{panic_message, Fetcher};
use crate::ratelimit::RateLimiter;

/// Runs one task: validate, ask the dependency's breaker for admission,
/// wait on the limiter, fetch, then report the outcome to both.
///
/// Never panics and never returns an error: every outcome, including a
/// panic in the fetcher, limiter or breaker, becomes a [`FetchResult`].
#[derive(Clone)]
pub struct TaskWorker {
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<dyn RateLimiter>,
    breakers: Arc<BreakerRegistry>,
}

impl TaskWorker {
    pub fn new(fetcher: Arc<dyn Fetcher>, limiter: Arc<dyn RateLimiter>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            fetcher,
            limiter,
            breakers,
        }
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub async fn run(&self, task: &FetchTask) -> FetchResult {
        let start = Instant::now();
        AssertUnwindSafe(self.attempt(task, start))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(task_id = %task.id, panic = %message, "task panicked");
                FetchResult::failed(task, FetchError::worker(format!("task panicked: {message}")), start.elapsed())
            })
    }

    async fn attempt(&self, task: &FetchTask, start: Instant) -> FetchResult {
        if let Err(err) = task.validate() {
            debug!(task_id = %task.id, "task rejected by validation");
            return FetchResult::failed(task, err.into(), start.elapsed());
        }

        let dependency = self.fetcher.dependency();
        let breaker = self.breakers.get(dependency);
        if let Err(retry_in) = breaker.try_acquire() {
            debug!(task_id = %task.id, dependency, "breaker open; rejecting task");
            return FetchResult::failed(task, FetchError::breaker_open(dependency, retry_in), start.elapsed());
        }

        self.limiter.wait_if_needed().await;

        let fetched = AssertUnwindSafe(self.fetcher.fetch(&task.source, &task.params))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(FetchError::worker(format!("fetch panicked: {}", panic_message(payload.as_ref()))))
            });

        match fetched {
            Ok(items) => {
                breaker.record_success();
                self.limiter.record_success();
                FetchResult::succeeded(task, items, start.elapsed())
            }
            Err(err) => {
                match &err {
                    FetchError::RateLimited { .. } => self.limiter.record_rate_limited(),
                    FetchError::Cancelled | FetchError::Validation { .. } => {}
                    _ => self.limiter.record_error(),
                }
                if !matches!(err, FetchError::Cancelled | FetchError::Validation { .. }) {
                    breaker.record_failure();
                }
                FetchResult::failed(task, err, start.elapsed())
            }
        }
    }

    pub(crate) async fn run_reporting(&self, task: &FetchTask, batch_id: Uuid, sink: &dyn EventSink) -> FetchResult {
        emit_guarded(
            sink,
            Event::TaskStarted {
                batch_id,
                task_id: task.id.clone(),
                source: task.source.clone(),
                attempt: task.attempt,
            },
        )
        .await;
        self.run(task).await
    }
}
