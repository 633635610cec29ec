use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fetchflow_core::ResultStatus;
use fetchflow_exec::executor::{Event, EventSink};

/// One-line progress display on stderr.
#[derive(Default)]
pub struct ProgressEventSink {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    running: AtomicUsize,
}

impl ProgressEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&self, completed: usize, total: usize) {
        let percent = if total > 0 { (completed * 100) / total } else { 100 };
        eprint!(
            "\rProgress: [{}/{}] {}% (✓{} ✗{} →{})",
            completed,
            total,
            percent,
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.running.load(Ordering::Relaxed)
        );
        if completed == total {
            eprintln!();
        }
    }
}

#[async_trait]
impl EventSink for ProgressEventSink {
    async fn emit(&self, event: Event) {
        match event {
            Event::TaskStarted { .. } => {
                self.running.fetch_add(1, Ordering::Relaxed);
            }
            Event::TaskFinished { status, .. } => {
                self.running
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
                    .ok();
                if status == ResultStatus::Succeeded {
                    self.succeeded.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Event::Progress { completed, total, .. } => self.render(completed, total),
            Event::BatchCancelled { .. } => eprintln!(),
            _ => {}
        }
    }
}
