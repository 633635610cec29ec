use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::fixed::FixedRateLimiter;
use super::{RateLimiter, MIN_RATE};

const DECREASE_ABOVE_ERROR_RATE: f64 = 0.10;
const INCREASE_BELOW_ERROR_RATE: f64 = 0.02;
const DECREASE_FACTOR: f64 = 0.8;
const INCREASE_FACTOR: f64 = 1.2;
const RATE_LIMITED_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub adaptation_interval: Duration,
    /// Outcomes needed in a window before the rate is reconsidered.
    pub min_samples: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_rate: 1.0,
            min_rate: 0.1,
            max_rate: 10.0,
            adaptation_interval: Duration::from_secs(60),
            min_samples: 10,
        }
    }
}

fn sane_bound(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.max(MIN_RATE)
    } else {
        MIN_RATE
    }
}

struct Window {
    rate: f64,
    successes: u64,
    errors: u64,
    started: Instant,
}

impl Window {
    fn restart(&mut self) {
        self.successes = 0;
        self.errors = 0;
        self.started = Instant::now();
    }
}

/// Fixed spacing whose rate follows the observed error ratio.
///
/// Once per `adaptation_interval` (given enough samples) the rate is cut to
/// 0.8x above 10% errors or raised 1.2x below 2%. An explicit rate-limit
/// signal halves it immediately.
pub struct AdaptiveRateLimiter {
    config: AdaptiveConfig,
    limiter: FixedRateLimiter,
    window: Mutex<Window>,
}

impl AdaptiveRateLimiter {
    /// Bounds below [`MIN_RATE`] (or not finite) are raised to it, so repeated
    /// cuts never drive the rate towards zero.
    pub fn new(mut config: AdaptiveConfig) -> Self {
        config.min_rate = sane_bound(config.min_rate);
        config.max_rate = sane_bound(config.max_rate).max(config.min_rate);
        if !config.initial_rate.is_finite() {
            config.initial_rate = config.min_rate;
        }
        let rate = config.initial_rate.clamp(config.min_rate, config.max_rate.max(config.min_rate));
        Self {
            limiter: FixedRateLimiter::new(rate),
            window: Mutex::new(Window {
                rate,
                successes: 0,
                errors: 0,
                started: Instant::now(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clamp(&self, rate: f64) -> f64 {
        rate.clamp(self.config.min_rate, self.config.max_rate.max(self.config.min_rate))
    }

    fn record(&self, error: bool) {
        let mut w = self.lock();
        if error {
            w.errors += 1;
        } else {
            w.successes += 1;
        }

        let samples = w.successes + w.errors;
        if w.started.elapsed() < self.config.adaptation_interval || samples < self.config.min_samples {
            return;
        }

        let error_rate = w.errors as f64 / samples as f64;
        let old = w.rate;
        let new = if error_rate > DECREASE_ABOVE_ERROR_RATE {
            self.clamp(old * DECREASE_FACTOR)
        } else if error_rate < INCREASE_BELOW_ERROR_RATE {
            self.clamp(old * INCREASE_FACTOR)
        } else {
            old
        };
        w.restart();

        if new != old {
            w.rate = new;
            self.limiter.set_rate(new);
            info!(
                old_rate = old,
                new_rate = new,
                error_rate,
                samples,
                "adaptive rate limit adjusted"
            );
        }
    }
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn wait_if_needed(&self) -> Duration {
        self.limiter.wait_if_needed().await
    }

    fn record_success(&self) {
        self.record(false);
    }

    fn record_error(&self) {
        self.record(true);
    }

    fn record_rate_limited(&self) {
        let mut w = self.lock();
        let old = w.rate;
        let new = self.clamp(old * RATE_LIMITED_FACTOR);
        w.rate = new;
        w.restart();
        self.limiter.set_rate(new);
        info!(old_rate = old, new_rate = new, "rate limited by dependency; backing off");
    }

    fn current_rate(&self) -> f64 {
        self.lock().rate
    }
}
