use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fixed::FixedRateLimiter;
use super::{interval_for, RateLimiter};

#[derive(Debug, thiserror::Error)]
pub enum SharedStateError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("shared state call timed out after {0:?}")]
    Timeout(Duration),
    #[error("shared state unavailable: {0}")]
    Unavailable(String),
}

/// Shared record of the last permit issued, used by cooperating processes.
#[async_trait]
pub trait SharedIssueClock: Send + Sync {
    /// Atomically reserves the next slot at least `interval` after the last
    /// one and returns how long the caller must wait for it.
    async fn reserve(&self, interval: Duration) -> Result<Duration, SharedStateError>;
}

// Slots are kept in the server's wall-clock microseconds so every client
// agrees on "now". The key outlives the furthest reservation. `%.0f` keeps
// all 16 digits; Lua's default number formatting would round them.
const RESERVE_SCRIPT: &str = r#"
local key = KEYS[1]
local interval = tonumber(ARGV[1])
local ttl_ms = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000000 + tonumber(t[2])
local last = tonumber(redis.call('GET', key)) or 0
local slot = now
if last + interval > slot then
    slot = last + interval
end
redis.call('SET', key, string.format('%.0f', slot), 'PX', math.ceil((slot - now) / 1000) + ttl_ms)
return slot - now
"#;

/// [`SharedIssueClock`] backed by a single Redis key.
#[derive(Clone)]
pub struct RedisIssueClock {
    conn: ConnectionManager,
    script: Arc<Script>,
    key: String,
    ttl: Duration,
}

impl std::fmt::Debug for RedisIssueClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisIssueClock").field("key", &self.key).finish()
    }
}

impl RedisIssueClock {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, SharedStateError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            script: Arc::new(Script::new(RESERVE_SCRIPT)),
            key: key.into(),
            ttl: Duration::from_secs(60),
        })
    }
}

#[async_trait]
impl SharedIssueClock for RedisIssueClock {
    async fn reserve(&self, interval: Duration) -> Result<Duration, SharedStateError> {
        let mut conn = self.conn.clone();
        let wait_us: i64 = self
            .script
            .key(&self.key)
            .arg(interval.as_micros() as i64)
            .arg(self.ttl.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;
        Ok(Duration::from_micros(wait_us.max(0) as u64))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributedConfig {
    pub rate: f64,
    pub redis_url: String,
    pub key: String,
    /// Upper bound on one shared-state round trip before falling back.
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key: "fetchflow:ratelimit".to_string(),
            call_timeout: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Fixed spacing enforced across processes through a [`SharedIssueClock`].
///
/// When the shared state fails or is slow, permits come from a local
/// [`FixedRateLimiter`] at the same rate until it answers again.
pub struct DistributedRateLimiter {
    clock: Option<Arc<dyn SharedIssueClock>>,
    fallback: FixedRateLimiter,
    rate: f64,
    interval: Option<Duration>,
    call_timeout: Duration,
    degraded: AtomicBool,
}

impl DistributedRateLimiter {
    pub fn new(clock: Arc<dyn SharedIssueClock>, rate: f64, call_timeout: Duration) -> Self {
        Self {
            clock: Some(clock),
            fallback: FixedRateLimiter::new(rate),
            rate,
            interval: interval_for(rate),
            call_timeout,
            degraded: AtomicBool::new(false),
        }
    }

    /// Local-only limiter used when the shared state could not be reached.
    pub fn degraded(rate: f64) -> Self {
        Self {
            clock: None,
            fallback: FixedRateLimiter::new(rate),
            rate,
            interval: interval_for(rate),
            call_timeout: Duration::ZERO,
            degraded: AtomicBool::new(true),
        }
    }

    pub async fn connect(config: &DistributedConfig) -> Self {
        let connecting = RedisIssueClock::connect(&config.redis_url, config.key.clone());
        let outcome = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(res) => res,
            Err(_) => Err(SharedStateError::Timeout(config.connect_timeout)),
        };
        match outcome {
            Ok(clock) => {
                info!(key = %config.key, rate = config.rate, "distributed rate limiter connected");
                Self::new(Arc::new(clock), config.rate, config.call_timeout)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    rate = config.rate,
                    "shared rate limit state unreachable; using local fixed limiter"
                );
                Self::degraded(config.rate)
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, err: &SharedStateError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(error = %err, "shared rate limit state failed; falling back to local limiter");
        } else {
            debug!(error = %err, "shared rate limit state still failing");
        }
    }

    fn recover(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("shared rate limit state reachable again");
        }
    }
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn wait_if_needed(&self) -> Duration {
        let Some(interval) = self.interval else {
            return Duration::ZERO;
        };
        let Some(clock) = &self.clock else {
            return self.fallback.wait_if_needed().await;
        };

        let start = Instant::now();
        let reserved = match tokio::time::timeout(self.call_timeout, clock.reserve(interval)).await {
            Ok(res) => res,
            Err(_) => Err(SharedStateError::Timeout(self.call_timeout)),
        };
        match reserved {
            Ok(wait) => {
                self.recover();
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            Err(err) => {
                self.degrade(&err);
                self.fallback.wait_if_needed().await;
            }
        }
        start.elapsed()
    }

    fn current_rate(&self) -> f64 {
        self.rate
    }
}
