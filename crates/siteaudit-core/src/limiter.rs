//! Bounded concurrency limiter
//!
//! Admits at most `N` units of work at once. Waiters are served in arrival
//! order; the permit is released when the returned guard drops, so every exit
//! path of the guarded work, including errors and panics, gives it back.
//!
//! # Example
//! ```
//! # async fn example() -> siteaudit_core::Result<()> {
//! use siteaudit_core::limiter::ConcurrencyLimiter;
//!
//! let limiter = ConcurrencyLimiter::new(4);
//! let value = limiter.run(async { 21 * 2 }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::{AuditError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Counting semaphore with FIFO admission
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held permit. Dropping it admits the next waiter.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `capacity` units at once (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    ///
    /// No timeout: the guarded work enforces its own deadline.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AuditError::Limiter(e.to_string()))?;
        trace!(in_flight = self.in_flight(), "Limiter permit acquired");
        Ok(LimiterPermit { _permit: permit })
    }

    /// Run `work` while holding a permit
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(work.await)
    }

    /// Maximum concurrent units
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() -> anyhow::Result<()> {
        let limiter = ConcurrencyLimiter::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_waiters_served_in_arrival_order() -> anyhow::Result<()> {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await?;
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await?;
                order.lock().await.push(i);
                Ok::<_, AuditError>(())
            }));
            // Let each waiter enqueue before the next one starts.
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        drop(held);
        for handle in handles {
            handle.await??;
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[tokio::test]
    async fn test_permit_released_when_work_errors() -> anyhow::Result<()> {
        let limiter = ConcurrencyLimiter::new(1);
        let outcome: Result<std::result::Result<(), &str>> =
            limiter.run(async { Err("boom") }).await;
        assert!(matches!(outcome, Ok(Err("boom"))));
        assert_eq!(limiter.in_flight(), 0);
        Ok(())
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
