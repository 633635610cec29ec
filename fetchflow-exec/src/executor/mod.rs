mod concurrency;
mod dispatch;
pub mod events;
pub mod metrics;
mod orchestrator;
pub mod perf_log;
mod result;
mod types;
pub mod worker;

pub use metrics::{BatchMetrics, MetricsCollector, MetricsEventSink};

pub use events::{
    CompositeEventSink, Event, EventSink, NoOpEventSink, ProgressCallback, StdoutEventSink, TracingEventSink,
};
pub use orchestrator::Orchestrator;
pub use perf_log::PerfLogSink;
pub use result::{BatchReport, ExecutionError};
pub use types::{DispatchStrategy, OrchestratorConfig};
pub use worker::TaskWorker;
