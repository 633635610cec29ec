//! Rate limiters that gate outbound fetches against a throughput budget.
//!
//! All flavors share the [`RateLimiter`] contract and are picked once, at
//! construction, by [`build_rate_limiter`].

mod adaptive;
mod distributed;
mod fixed;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use adaptive::{AdaptiveConfig, AdaptiveRateLimiter};
pub use distributed::{
    DistributedConfig, DistributedRateLimiter, RedisIssueClock, SharedIssueClock, SharedStateError,
};
pub use fixed::FixedRateLimiter;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until the caller may issue one call and returns how long it
    /// waited. Safe for concurrent callers; callers are served in arrival
    /// order.
    async fn wait_if_needed(&self) -> Duration;

    fn record_success(&self) {}

    fn record_error(&self) {}

    /// The dependency explicitly told us to slow down.
    fn record_rate_limited(&self) {}

    /// Current permitted rate in calls per second (`<= 0` means unlimited).
    fn current_rate(&self) -> f64;
}

#[async_trait]
impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    async fn wait_if_needed(&self) -> Duration {
        (**self).wait_if_needed().await
    }

    fn record_success(&self) {
        (**self).record_success()
    }

    fn record_error(&self) {
        (**self).record_error()
    }

    fn record_rate_limited(&self) {
        (**self).record_rate_limited()
    }

    fn current_rate(&self) -> f64 {
        (**self).current_rate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitConfig {
    Fixed { rate: f64 },
    Adaptive(AdaptiveConfig),
    Distributed(DistributedConfig),
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig::Fixed { rate: 1.0 }
    }
}

impl RateLimitConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            RateLimitConfig::Fixed { .. } => "fixed",
            RateLimitConfig::Adaptive(_) => "adaptive",
            RateLimitConfig::Distributed(_) => "distributed",
        }
    }

    pub fn rate(&self) -> f64 {
        match self {
            RateLimitConfig::Fixed { rate } => *rate,
            RateLimitConfig::Adaptive(c) => c.initial_rate,
            RateLimitConfig::Distributed(c) => c.rate,
        }
    }

    /// The budget one of `slots` isolated workers should get so their sum
    /// approximates this budget. Distributed limits already share state
    /// across workers and are returned unchanged.
    pub fn split_across(&self, slots: usize) -> RateLimitConfig {
        let n = slots.max(1) as f64;
        match self {
            RateLimitConfig::Fixed { rate } => RateLimitConfig::Fixed { rate: rate / n },
            RateLimitConfig::Adaptive(c) => RateLimitConfig::Adaptive(AdaptiveConfig {
                initial_rate: c.initial_rate / n,
                min_rate: c.min_rate / n,
                max_rate: c.max_rate / n,
                ..c.clone()
            }),
            RateLimitConfig::Distributed(c) => RateLimitConfig::Distributed(c.clone()),
        }
    }
}

/// Builds the limiter described by `config`.
///
/// Never fails: a distributed limiter whose shared state cannot be reached
/// starts out degraded to local fixed spacing.
pub async fn build_rate_limiter(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
    match config {
        RateLimitConfig::Fixed { rate } => Arc::new(FixedRateLimiter::new(*rate)),
        RateLimitConfig::Adaptive(c) => Arc::new(AdaptiveRateLimiter::new(c.clone())),
        RateLimitConfig::Distributed(c) => Arc::new(DistributedRateLimiter::connect(c).await),
    }
}

/// Slowest positive rate a limiter will space permits for: one call every
/// [`MAX_INTERVAL`].
pub const MIN_RATE: f64 = 0.001;

/// Longest spacing between two permits.
pub const MAX_INTERVAL: Duration = Duration::from_secs(1000);

/// Spacing between permits for `rate` calls per second; `None` = unlimited.
/// Rates below [`MIN_RATE`] are spaced at [`MAX_INTERVAL`].
pub(crate) fn interval_for(rate: f64) -> Option<Duration> {
    if !(rate.is_finite() && rate > 0.0) {
        return None;
    }
    let interval = Duration::try_from_secs_f64(1.0 / rate).unwrap_or(MAX_INTERVAL);
    Some(interval.min(MAX_INTERVAL))
}
