use crate::fetcher::ProcessFetcher;
use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryPassConfig;

/// How the first pass spreads tasks over concurrent executors.
#[derive(Debug, Clone)]
pub enum DispatchStrategy {
    /// Long-lived worker tasks pulling from one queue and sharing the
    /// orchestrator's limiter and breakers.
    Threads { max_workers: usize },
    /// Isolated worker slots, each fetching through its own child processes
    /// with its own limiter and breaker registry. `rate_limit` is the budget
    /// for the whole batch; each slot gets its share (see
    /// [`RateLimitConfig::split_across`]), so the global rate is only
    /// approximated except for distributed limits.
    Processes {
        max_workers: usize,
        command: ProcessFetcher,
        rate_limit: RateLimitConfig,
    },
    /// Every task multiplexed on the caller's task, bounded by a semaphore.
    Cooperative { max_concurrent: usize },
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        DispatchStrategy::Threads { max_workers: 5 }
    }
}

impl DispatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchStrategy::Threads { .. } => "threads",
            DispatchStrategy::Processes { .. } => "processes",
            DispatchStrategy::Cooperative { .. } => "cooperative",
        }
    }

    pub fn width(&self) -> usize {
        match self {
            DispatchStrategy::Threads { max_workers } | DispatchStrategy::Processes { max_workers, .. } => {
                *max_workers
            }
            DispatchStrategy::Cooperative { max_concurrent } => *max_concurrent,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub strategy: DispatchStrategy,
    pub retry: RetryPassConfig,
}
