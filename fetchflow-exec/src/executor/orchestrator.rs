use std::sync::Arc;

use chrono::Utc;
use fetchflow_core::{BatchSummary, FetchParams, FetchResult, FetchTask};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::executor::dispatch::{self, Pass};
use crate::executor::events::{emit_guarded, Event, EventSink, NoOpEventSink};
use crate::executor::result::{BatchReport, ExecutionError};
use crate::executor::types::{DispatchStrategy, OrchestratorConfig};
use crate::executor::worker::TaskWorker;
use crate::fetcher::Fetcher;
use crate::persist::RecordSink;
use crate::ratelimit::RateLimiter;

/// Fans a batch of sources out over the configured strategy, then retries
/// failures once, sequentially, after the first pass has fully drained.
pub struct Orchestrator {
    config: OrchestratorConfig,
    worker: TaskWorker,
    event_sink: Arc<dyn EventSink>,
    record_sink: Option<Arc<dyn RecordSink>>,
    cancel: CancellationToken,
}

/// Bookkeeping for one batch.
struct Batch {
    id: Uuid,
    total: usize,
    params: FetchParams,
    /// Outcomes that are final, in completion order.
    results: Vec<FetchResult>,
    /// First-pass failures waiting for the retry pass.
    pending_retry: Vec<FetchTask>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<dyn RateLimiter>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            config,
            worker: TaskWorker::new(fetcher, limiter, breakers),
            event_sink: Arc::new(NoOpEventSink),
            record_sink: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Successful results of [`run_batch`](Self::run_batch) are persisted here.
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.record_sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.worker.breakers()
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        self.worker.limiter()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetches every source and returns exactly one final result per source,
    /// in the order outcomes became final.
    pub async fn scrape_many<I, S>(&self, sources: I, params: &FetchParams) -> Result<Vec<FetchResult>, ExecutionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scrape(Uuid::new_v4(), sources, params).await
    }

    /// [`scrape_many`](Self::scrape_many), then persists successful results
    /// through the record sink if one is configured.
    pub async fn run_batch<I, S>(&self, sources: I, params: &FetchParams) -> Result<BatchReport, ExecutionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let results = self.scrape(batch_id, sources, params).await?;
        let summary = BatchSummary::from_results(&results);

        let persisted_rows = match &self.record_sink {
            Some(sink) => sink.persist(&results).await?,
            None => 0,
        };

        Ok(BatchReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            results,
            summary,
            persisted_rows,
        })
    }

    async fn scrape<I, S>(&self, batch_id: Uuid, sources: I, params: &FetchParams) -> Result<Vec<FetchResult>, ExecutionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.config.strategy.width() == 0 {
            return Err(ExecutionError::Config(format!(
                "{} strategy needs at least one worker",
                self.config.strategy.name()
            )));
        }

        let tasks: Vec<FetchTask> = sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| FetchTask::new(i, source, params.clone()))
            .collect();
        let mut batch = Batch {
            id: batch_id,
            total: tasks.len(),
            params: params.clone(),
            results: Vec::with_capacity(tasks.len()),
            pending_retry: Vec::new(),
        };

        self.emit(Event::BatchStarted {
            batch_id,
            total: batch.total,
            strategy: self.config.strategy.name(),
        })
        .await;
        info!(%batch_id, total = batch.total, strategy = self.config.strategy.name(), "starting batch");

        let retry_worker = match self.first_pass(&mut batch, tasks).await {
            Some(worker) => worker,
            None => return Err(self.cancelled(&batch).await),
        };

        if !batch.pending_retry.is_empty() && self.retry_pass(&mut batch, &retry_worker).await.is_err() {
            return Err(self.cancelled(&batch).await);
        }

        let summary = BatchSummary::from_results(&batch.results);
        info!(
            %batch_id,
            succeeded = summary.succeeded,
            failed = summary.unsuccessful(),
            total_items = summary.total_items,
            "batch complete"
        );
        self.emit(Event::BatchFinished { batch_id, summary }).await;
        Ok(batch.results)
    }

    /// Runs the first pass. Returns the worker the retry pass should use, or
    /// `None` if the batch was cancelled.
    async fn first_pass(&self, batch: &mut Batch, tasks: Vec<FetchTask>) -> Option<TaskWorker> {
        if tasks.is_empty() {
            return Some(self.worker.clone());
        }
        let sink = self.event_sink.clone();
        match &self.config.strategy {
            DispatchStrategy::Threads { max_workers } => {
                let pass = dispatch::threads(&self.worker, *max_workers, tasks, batch.id, sink, self.cancel.clone());
                self.drain(batch, pass).await.then(|| self.worker.clone())
            }
            DispatchStrategy::Processes {
                max_workers,
                command,
                rate_limit,
            } => {
                let n = (*max_workers).min(tasks.len()).max(1);
                let slots = dispatch::process_slots(n, command, &rate_limit.split_across(n), self.worker.breakers()).await;
                let retry_worker = slots[0].clone();
                let pass = dispatch::pooled(slots, tasks, batch.id, sink, self.cancel.clone());
                self.drain(batch, pass).await.then_some(retry_worker)
            }
            DispatchStrategy::Cooperative { max_concurrent } => {
                let pass = dispatch::cooperative(&self.worker, *max_concurrent, tasks, batch.id, self.event_sink.as_ref());
                self.drain(batch, pass).await.then(|| self.worker.clone())
            }
        }
    }

    /// Collects a pass to the end. Returns `false` if cancelled first.
    async fn drain(&self, batch: &mut Batch, mut pass: Pass<'_>) -> bool {
        let mut completed = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    completed = false;
                    break;
                }
                next = pass.results.next() => match next {
                    Some(result) => self.collect_first_pass(batch, result).await,
                    None => break,
                },
            }
        }

        // In-flight work on spawned executors finishes; its results are dropped.
        drop(pass.results);
        for handle in pass.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker executor ended abnormally");
            }
        }
        completed
    }

    async fn collect_first_pass(&self, batch: &mut Batch, result: FetchResult) {
        self.emit(Event::task_finished(batch.id, &result)).await;

        if self.config.retry.enabled && result.is_retryable() {
            let task = FetchTask {
                id: result.task_id.clone(),
                source: result.source.clone(),
                params: batch.params.clone(),
                attempt: result.attempt,
            };
            debug!(task_id = %task.id, error = ?result.error, "queued for retry pass");
            batch.pending_retry.push(task);
            return;
        }
        self.finalize(batch, result).await;
    }

    async fn finalize(&self, batch: &mut Batch, result: FetchResult) {
        batch.results.push(result);
        self.emit(Event::Progress {
            batch_id: batch.id,
            completed: batch.results.len(),
            total: batch.total,
        })
        .await;
    }

    /// Retries every pending failure once, one at a time, backing off
    /// between attempts. `Err` means the batch was cancelled.
    async fn retry_pass(&self, batch: &mut Batch, worker: &TaskWorker) -> Result<(), ()> {
        let pending = std::mem::take(&mut batch.pending_retry);
        info!(batch_id = %batch.id, tasks = pending.len(), "starting retry pass");
        self.emit(Event::RetryPassStarted {
            batch_id: batch.id,
            tasks: pending.len(),
        })
        .await;

        for (i, task) in pending.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(());
            }
            let delay = self.config.retry.delay_for(i);
            self.emit(Event::RetryScheduled {
                batch_id: batch.id,
                task_id: task.id.clone(),
                source: task.source.clone(),
                delay,
            })
            .await;

            let retry = task.for_retry();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(()),
                result = async {
                    tokio::time::sleep(delay).await;
                    worker.run_reporting(&retry, batch.id, self.event_sink.as_ref()).await
                } => result,
            };

            self.emit(Event::task_finished(batch.id, &result)).await;
            self.finalize(batch, result).await;
        }
        Ok(())
    }

    async fn cancelled(&self, batch: &Batch) -> ExecutionError {
        let completed = batch.results.len();
        self.emit(Event::BatchCancelled {
            batch_id: batch.id,
            completed,
            total: batch.total,
        })
        .await;
        warn!(batch_id = %batch.id, completed, total = batch.total, "batch cancelled");
        ExecutionError::Cancelled {
            completed,
            total: batch.total,
        }
    }

    async fn emit(&self, event: Event) {
        emit_guarded(self.event_sink.as_ref(), event).await;
    }
}
