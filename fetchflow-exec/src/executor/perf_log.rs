use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::executor::{Event, EventSink};

/// Appends one JSON line per finished task attempt to a file.
pub struct PerfLogSink {
    path: PathBuf,
    file: Mutex<File>,
    write_failed: AtomicBool,
}

impl PerfLogSink {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            write_failed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for PerfLogSink {
    async fn emit(&self, event: Event) {
        let Event::TaskFinished {
            batch_id,
            task_id,
            source,
            attempt,
            status,
            items,
            duration,
            error,
        } = event
        else {
            return;
        };

        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "operation": "fetch",
            "batch_id": batch_id.to_string(),
            "task_id": task_id,
            "source": source,
            "attempt": attempt,
            "duration_ms": duration.as_millis() as u64,
            "items": items,
            "success": status == fetchflow_core::ResultStatus::Succeeded,
            "status": status.as_str(),
            "error": error.map(|e| e.to_string()),
        });
        let mut line = entry.to_string();
        line.push('\n');

        let mut file = self.file.lock().await;
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                warn!(path = %self.path.display(), error = %e, "failed to write performance log");
            }
        }
    }
}
