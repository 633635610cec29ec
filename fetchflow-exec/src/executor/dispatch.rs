//! The three first-pass strategies. Each yields results as a stream in
//! completion order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fetchflow_core::{FetchResult, FetchTask};
use futures_util::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::executor::concurrency::ConcurrencyLimit;
use crate::executor::worker::TaskWorker;
use crate::executor::EventSink;
use crate::fetcher::{Fetcher, ProcessFetcher};
use crate::ratelimit::{build_rate_limiter, RateLimitConfig};

pub(crate) struct Pass<'a> {
    pub results: BoxStream<'a, FetchResult>,
    /// Spawned executors; awaited after the stream ends or is abandoned.
    pub workers: Vec<JoinHandle<()>>,
}

type TaskQueue = Arc<Mutex<VecDeque<FetchTask>>>;

fn next_task(queue: &TaskQueue) -> Option<FetchTask> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop_front()
}

async fn worker_loop(
    worker: TaskWorker,
    queue: TaskQueue,
    results: mpsc::UnboundedSender<FetchResult>,
    batch_id: Uuid,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let Some(task) = next_task(&queue) else {
            break;
        };
        let result = worker.run_reporting(&task, batch_id, sink.as_ref()).await;
        if results.send(result).is_err() {
            // Nobody is collecting any more; finish quietly.
            break;
        }
    }
}

/// Spawns one long-lived executor per worker, all pulling from one queue.
pub(crate) fn pooled(
    workers: Vec<TaskWorker>,
    tasks: Vec<FetchTask>,
    batch_id: Uuid,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Pass<'static> {
    let queue: TaskQueue = Arc::new(Mutex::new(tasks.into()));
    let (tx, rx) = mpsc::unbounded_channel();

    let handles = workers
        .into_iter()
        .map(|worker| {
            tokio::spawn(worker_loop(
                worker,
                queue.clone(),
                tx.clone(),
                batch_id,
                sink.clone(),
                cancel.clone(),
            ))
        })
        .collect();
    drop(tx);

    let results = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|r| (r, rx)) }).boxed();
    Pass {
        results,
        workers: handles,
    }
}

pub(crate) fn threads(
    worker: &TaskWorker,
    max_workers: usize,
    tasks: Vec<FetchTask>,
    batch_id: Uuid,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Pass<'static> {
    let n = max_workers.min(tasks.len()).max(1);
    debug!(workers = n, "dispatching on shared worker pool");
    pooled(vec![worker.clone(); n], tasks, batch_id, sink, cancel)
}

/// Builds `n` isolated slots, each fetching through its own worker
/// processes with private limiter and breaker state.
pub(crate) async fn process_slots(
    n: usize,
    command: &ProcessFetcher,
    slot_rate_limit: &RateLimitConfig,
    breakers: &BreakerRegistry,
) -> Vec<TaskWorker> {
    let mut slots = Vec::with_capacity(n);
    for _ in 0..n.max(1) {
        let fetcher: Arc<dyn Fetcher> = Arc::new(command.clone());
        let limiter = build_rate_limiter(slot_rate_limit).await;
        slots.push(TaskWorker::new(fetcher, limiter, Arc::new(breakers.fresh())));
    }
    slots
}

/// Multiplexes every task on the polling task; at most `max_concurrent` run
/// at once. Dropping the stream cancels whatever is in flight.
pub(crate) fn cooperative<'a>(
    worker: &'a TaskWorker,
    max_concurrent: usize,
    tasks: Vec<FetchTask>,
    batch_id: Uuid,
    sink: &'a dyn EventSink,
) -> Pass<'a> {
    let limit = ConcurrencyLimit::new(max_concurrent);
    let in_flight: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|task| {
            let limit = limit.clone();
            async move {
                let _permit = limit.acquire().await;
                worker.run_reporting(&task, batch_id, sink).await
            }
        })
        .collect();

    Pass {
        results: in_flight.boxed(),
        workers: Vec::new(),
    }
}
