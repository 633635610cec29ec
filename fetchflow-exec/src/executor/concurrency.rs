use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting bound on in-flight work. The semaphore is never closed, so
/// waiting for a slot cannot fail.
#[derive(Clone)]
pub(crate) struct ConcurrencyLimit {
    slots: Arc<Semaphore>,
}

impl ConcurrencyLimit {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub(crate) async fn acquire(&self) -> ConcurrencyPermit {
        match self.slots.clone().acquire_owned().await {
            Ok(permit) => ConcurrencyPermit { _permit: permit },
            Err(_) => unreachable!("concurrency limit semaphore is never closed"),
        }
    }
}

pub(crate) struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn third_acquire_waits_for_a_release() {
        let limit = ConcurrencyLimit::new(2);
        let first = limit.acquire().await;
        let _second = limit.acquire().await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), limit.acquire()).await;
        assert!(blocked.is_err());

        drop(first);
        let third = tokio::time::timeout(Duration::from_millis(50), limit.acquire()).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn zero_is_raised_to_one_slot() {
        let limit = ConcurrencyLimit::new(0);
        let _permit = limit.acquire().await;
    }
}
