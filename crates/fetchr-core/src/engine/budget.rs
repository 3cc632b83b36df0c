//! Global cap on concurrent segment connections across all transfers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct GlobalConnectionBudget {
    max_total: usize,
    in_use: AtomicUsize,
    released: Notify,
}

impl GlobalConnectionBudget {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            in_use: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.max_total.saturating_sub(self.in_use())
    }

    /// Reserve up to `requested` slots; returns how many were taken (maybe 0).
    pub fn reserve(&self, requested: usize) -> usize {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let take = requested.min(self.max_total.saturating_sub(current));
            match self.in_use.compare_exchange_weak(
                current,
                current + take,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return take,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(n))
            });
        self.released.notify_waiters();
    }

    /// Reserve between 1 and `requested` slots, waiting while the budget is
    /// exhausted. The slots go back when the guard drops.
    pub async fn acquire(self: &Arc<Self>, requested: usize) -> BudgetGuard {
        let requested = requested.max(1);
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            let reserved = self.reserve(requested);
            if reserved > 0 {
                return BudgetGuard {
                    budget: Arc::clone(self),
                    reserved,
                };
            }
            released.await;
        }
    }
}

/// Reserved connection slots; released on drop.
#[derive(Debug)]
pub struct BudgetGuard {
    budget: Arc<GlobalConnectionBudget>,
    reserved: usize,
}

impl BudgetGuard {
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl Drop for BudgetGuard {
    fn drop(&mut self) {
        self.budget.release(self.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reserve_and_release() {
        let budget = GlobalConnectionBudget::new(16);
        assert_eq!(budget.reserve(8), 8);
        assert_eq!(budget.reserve(10), 8);
        assert_eq!(budget.available(), 0);
        assert_eq!(budget.reserve(1), 0);
        budget.release(8);
        assert_eq!(budget.available(), 8);
        budget.release(100);
        assert_eq!(budget.in_use(), 0);
    }

    #[tokio::test]
    async fn guard_releases_and_wakes_waiter() {
        let budget = Arc::new(GlobalConnectionBudget::new(2));
        let first = budget.acquire(5).await;
        assert_eq!(first.reserved(), 2);
        assert_eq!(budget.available(), 0);

        let waiter = {
            let budget = Arc::clone(&budget);
            tokio::spawn(async move { budget.acquire(1).await.reserved() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(first);
        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 1);
        assert_eq!(budget.in_use(), 0);
    }
}
