//! Per-dependency circuit breaking.

mod registry;

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

pub use registry::BreakerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures (while closed) that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before letting a probe through.
    pub recovery_timeout: Duration,
    /// Half-open successes needed to close again.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub time_until_retry_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open (retry in {retry_in:?})")]
    Open { name: String, retry_in: Duration },
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }

    fn retry_in(&self, timeout: Duration) -> Duration {
        match self.last_failure {
            Some(at) => timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Closed / Open / HalfOpen breaker guarding one dependency.
///
/// Every transition happens under the breaker's single lock. Open rejects
/// without running the operation; once `recovery_timeout` has passed since
/// the last failure, the next admission moves it to HalfOpen. HalfOpen does
/// not cap concurrent probes: the first failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admission check for one call. `Err` carries the time left until a
    /// probe would be let through.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        if inner.state != BreakerState::Open {
            return Ok(());
        }
        let retry_in = inner.retry_in(self.config.recovery_timeout);
        if !retry_in.is_zero() {
            return Err(retry_in);
        }
        inner.state = BreakerState::HalfOpen;
        inner.success_count = 0;
        info!(breaker = %self.name, "circuit breaker half-open; probing");
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            // A call admitted before the breaker opened.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!(breaker = %self.name, "circuit breaker reopened after failed probe");
            }
            _ => {}
        }
    }

    /// Runs `op` if the breaker admits it and records the outcome.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.try_acquire() {
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_in,
            });
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Current state without triggering the Open to HalfOpen transition.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let time_until_retry = if inner.state == BreakerState::Open {
            inner.retry_in(self.config.recovery_timeout)
        } else {
            Duration::ZERO
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            time_until_retry_ms: time_until_retry.as_millis() as u64,
        }
    }

    /// Manually closes the breaker and clears its counters.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::closed();
        info!(breaker = %self.name, "circuit breaker reset");
    }
}
