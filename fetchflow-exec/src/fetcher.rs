//! The fetch collaborator seam.
//!
//! The engine treats a fetch as an opaque, possibly slow, possibly failing
//! call. [`Fetcher`] is the async contract; [`BlockingFetcher`] plus
//! [`OffloadBlocking`] adapts synchronous clients, and [`ProcessFetcher`]
//! runs an external worker command per call.

use std::any::Any;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fetchflow_core::{FetchError, FetchParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Breaker key used when a fetcher does not name its dependency.
pub const DEFAULT_DEPENDENCY: &str = "content_api";

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError>;

    /// Name of the downstream dependency, used to pick a circuit breaker.
    fn dependency(&self) -> &str {
        DEFAULT_DEPENDENCY
    }
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError> {
        (**self).fetch(source, params).await
    }

    fn dependency(&self) -> &str {
        (**self).dependency()
    }
}

/// A synchronous fetch client.
pub trait BlockingFetcher: Send + Sync + 'static {
    fn fetch_blocking(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError>;

    fn dependency(&self) -> &str {
        DEFAULT_DEPENDENCY
    }
}

/// Runs a [`BlockingFetcher`] on the runtime's blocking pool so async
/// callers never stall.
pub struct OffloadBlocking<F> {
    inner: Arc<F>,
}

impl<F: BlockingFetcher> OffloadBlocking<F> {
    pub fn new(inner: F) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

#[async_trait]
impl<F: BlockingFetcher> Fetcher for OffloadBlocking<F> {
    async fn fetch(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError> {
        let inner = self.inner.clone();
        let source = source.to_string();
        let params = params.clone();
        match tokio::task::spawn_blocking(move || inner.fetch_blocking(&source, &params)).await {
            Ok(res) => res,
            Err(err) if err.is_panic() => Err(FetchError::worker(format!(
                "blocking fetch panicked: {}",
                panic_message(err.into_panic().as_ref())
            ))),
            Err(err) => Err(FetchError::worker(format!("blocking fetch aborted: {err}"))),
        }
    }

    fn dependency(&self) -> &str {
        self.inner.dependency()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    source: &'a str,
    params: &'a FetchParams,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkerReply {
    Items(Vec<Value>),
    Wrapped { items: Vec<Value> },
    Failed { error: WorkerFailure },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkerFailure {
    Typed(FetchError),
    Message(String),
}

/// Fetches by running a worker command once per call.
///
/// The request `{"source": .., "params": ..}` is written to the child's
/// stdin. The child answers on stdout with a JSON array of items,
/// `{"items": [..]}`, or `{"error": ..}` where the error is either a tagged
/// fetch error or a plain message (treated as transient).
#[derive(Debug, Clone)]
pub struct ProcessFetcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    dependency: String,
}

impl ProcessFetcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            dependency: DEFAULT_DEPENDENCY.to_string(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = dependency.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Fetcher for ProcessFetcher {
    async fn fetch(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError> {
        let request = serde_json::to_vec(&WorkerRequest { source, params })
            .map_err(|e| FetchError::worker(format!("failed to encode worker request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::worker(format!("failed to start worker '{}': {e}", self.program)))?;

        // Dropping this future (on timeout) drops the child, which kills it.
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(&request).await {
                    // A worker that ignores its input may close stdin early.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(FetchError::worker(format!("worker i/o failed: {e}"))),
            Err(_) => {
                debug!(source, timeout_ms = self.timeout.as_millis() as u64, "worker timed out");
                return Err(FetchError::transient(format!(
                    "worker timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = match output.status.code() {
                Some(code) => format!("worker exited with status {code}: {stderr}"),
                None => format!("worker terminated by signal: {stderr}"),
            };
            return Err(FetchError::worker(message));
        }

        parse_reply(&output.stdout)
    }

    fn dependency(&self) -> &str {
        &self.dependency
    }
}

fn parse_reply(stdout: &[u8]) -> Result<Vec<Value>, FetchError> {
    match serde_json::from_slice::<WorkerReply>(stdout) {
        Ok(WorkerReply::Items(items)) | Ok(WorkerReply::Wrapped { items }) => Ok(items),
        Ok(WorkerReply::Failed {
            error: WorkerFailure::Typed(err),
        }) => Err(err),
        Ok(WorkerReply::Failed {
            error: WorkerFailure::Message(message),
        }) => Err(FetchError::transient(message)),
        Err(e) => Err(FetchError::worker(format!("malformed worker reply: {e}"))),
    }
}
