#![forbid(unsafe_code)]

//! Concurrent fetch orchestration.
//!
//! An [`Orchestrator`] spreads a batch of sources over one of three dispatch
//! strategies, gates every fetch through a per-dependency circuit breaker and
//! a rate limiter, retries failures once in a sequential pass and can hand
//! the final results to SQLite through a [`persist::RecordSink`].

pub mod breaker;
pub mod config;
pub mod executor;
pub mod fetcher;
pub mod persist;
pub mod ratelimit;
pub mod retry;

pub use crate::breaker::{BreakerConfig, BreakerError, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use crate::config::{ConfigError, FetchflowConfig};
pub use crate::executor::{BatchReport, DispatchStrategy, ExecutionError, Orchestrator, OrchestratorConfig};
pub use crate::fetcher::{BlockingFetcher, Fetcher, OffloadBlocking, ProcessFetcher, DEFAULT_DEPENDENCY};
pub use crate::persist::{BatchRecordSink, PersistError, RecordSink};
pub use crate::ratelimit::{build_rate_limiter, RateLimitConfig, RateLimiter};
pub use crate::retry::RetryPassConfig;
