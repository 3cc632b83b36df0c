//! One proxy binding per task, with a per-entry cap on active bindings.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};
use tokio::sync::Notify;

use super::select::{selection_for, SelectionPolicy};
use super::{ProxyError, ProxyIdentity, ProxyPool};
use crate::config::FetchrConfig;

struct BinderInner {
    pool: ProxyPool,
    policy: Box<dyn SelectionPolicy>,
    max_per_entry: usize,
    /// Active bindings per pool index.
    active: Mutex<Vec<usize>>,
    freed: Notify,
}

impl BinderInner {
    fn active(&self) -> MutexGuard<'_, Vec<usize>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hands out [`ProxyBinding`]s from a shared pool.
///
/// Cloning is cheap; clones share the pool and the active counts.
#[derive(Clone)]
pub struct ProxyAffinityBinder {
    inner: Arc<BinderInner>,
}

impl fmt::Debug for ProxyAffinityBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAffinityBinder")
            .field("pool", &self.inner.pool.len())
            .field("max_per_entry", &self.inner.max_per_entry)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl ProxyAffinityBinder {
    pub fn new(pool: ProxyPool, policy: Box<dyn SelectionPolicy>, max_per_entry: usize) -> Self {
        let slots = vec![0; pool.len()];
        Self {
            inner: Arc::new(BinderInner {
                pool,
                policy,
                max_per_entry: max_per_entry.max(1),
                active: Mutex::new(slots),
                freed: Notify::new(),
            }),
        }
    }

    pub fn from_config(pool: ProxyPool, cfg: &FetchrConfig) -> Self {
        Self::new(
            pool,
            selection_for(cfg.proxy_selection),
            cfg.max_bindings_per_proxy,
        )
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.inner.pool
    }

    /// Active bindings on `identity`.
    pub fn active_count(&self, identity: &ProxyIdentity) -> usize {
        let active = self.inner.active();
        self.inner
            .pool
            .entries()
            .iter()
            .zip(active.iter())
            .filter(|(p, _)| *p == identity)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Acquire without waiting. `Ok(None)` when every entry is at its cap.
    pub fn try_acquire(&self) -> Result<Option<ProxyBinding>, ProxyError> {
        if self.inner.pool.is_empty() {
            return Err(ProxyError::EmptyPool);
        }
        let mut active = self.inner.active();
        let eligible: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(_, n)| **n < self.inner.max_per_entry)
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return Ok(None);
        }
        let slot = self.inner.policy.pick(&eligible, self.inner.pool.len());
        active[slot] += 1;
        drop(active);

        let identity = self.inner.pool.entries()[slot].clone();
        tracing::debug!(proxy = %identity, "proxy bound");
        Ok(Some(ProxyBinding {
            identity,
            acquired_at: SystemTime::now(),
            acquired_instant: Instant::now(),
            slot,
            binder: Arc::clone(&self.inner),
        }))
    }

    /// Acquire a binding, waiting for a release when every entry is at its cap.
    pub async fn acquire(&self) -> Result<ProxyBinding, ProxyError> {
        loop {
            let freed = self.inner.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();
            if let Some(binding) = self.try_acquire()? {
                return Ok(binding);
            }
            freed.await;
        }
    }

    /// Return a binding to the pool. Dropping the binding does the same.
    pub fn release(&self, binding: ProxyBinding) {
        drop(binding);
    }
}

/// Exclusive hold on one pool entry for the lifetime of a task.
pub struct ProxyBinding {
    identity: ProxyIdentity,
    acquired_at: SystemTime,
    acquired_instant: Instant,
    slot: usize,
    binder: Arc<BinderInner>,
}

impl ProxyBinding {
    pub fn identity(&self) -> &ProxyIdentity {
        &self.identity
    }

    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_instant.elapsed()
    }
}

impl fmt::Debug for ProxyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyBinding")
            .field("identity", &self.identity)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Drop for ProxyBinding {
    fn drop(&mut self) {
        {
            let mut active = self.binder.active();
            if let Some(n) = active.get_mut(self.slot) {
                *n = n.saturating_sub(1);
            }
        }
        tracing::debug!(
            proxy = %self.identity,
            held_ms = self.acquired_instant.elapsed().as_millis() as u64,
            "proxy released"
        );
        self.binder.freed.notify_waiters();
    }
}
