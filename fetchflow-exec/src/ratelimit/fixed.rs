use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{interval_for, RateLimiter};

struct FixedState {
    rate: f64,
    interval: Option<Duration>,
    last_issue: Option<Instant>,
}

/// Grants at most one permit per `1 / rate` seconds.
///
/// Slots are reserved under the lock in arrival order and the caller sleeps
/// outside it, so concurrent callers queue up instead of racing.
pub struct FixedRateLimiter {
    state: Mutex<FixedState>,
}

impl FixedRateLimiter {
    pub fn new(rate: f64) -> Self {
        Self {
            state: Mutex::new(FixedState {
                rate,
                interval: interval_for(rate),
                last_issue: None,
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Changes the spacing for reservations made from now on.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.lock();
        state.rate = rate;
        state.interval = interval_for(rate);
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.lock().interval
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut state = self.lock();
        let Some(interval) = state.interval else {
            state.last_issue = Some(now);
            return now;
        };
        let slot = match state.last_issue {
            Some(last) => (last + interval).max(now),
            None => now,
        };
        state.last_issue = Some(slot);
        slot
    }
}

#[async_trait]
impl RateLimiter for FixedRateLimiter {
    async fn wait_if_needed(&self) -> Duration {
        let now = Instant::now();
        let slot = self.reserve(now);
        if slot > now {
            debug!(wait_ms = (slot - now).as_millis() as u64, "rate limiting");
            tokio::time::sleep_until(slot).await;
        }
        now.elapsed()
    }

    fn current_rate(&self) -> f64 {
        self.lock().rate
    }
}
