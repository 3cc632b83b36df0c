//! Pluggable proxy selection.

use rand::seq::SliceRandom;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ProxySelection;

/// Chooses which pool entry a new binding uses.
pub trait SelectionPolicy: Send + Sync + fmt::Debug {
    /// Pick one of `eligible` (indices of entries with free capacity, ascending,
    /// never empty) from a pool of `pool_len` entries.
    fn pick(&self, eligible: &[usize], pool_len: usize) -> usize;
}

/// Cycles through the pool, skipping entries at capacity.
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    cursor: AtomicUsize,
}

impl SelectionPolicy for RoundRobinSelection {
    fn pick(&self, eligible: &[usize], pool_len: usize) -> usize {
        let start = self.cursor.load(Ordering::Relaxed) % pool_len.max(1);
        let chosen = eligible
            .iter()
            .copied()
            .find(|&i| i >= start)
            .unwrap_or(eligible[0]);
        self.cursor.store(chosen + 1, Ordering::Relaxed);
        chosen
    }
}

#[derive(Debug, Default)]
pub struct RandomSelection;

impl SelectionPolicy for RandomSelection {
    fn pick(&self, eligible: &[usize], _pool_len: usize) -> usize {
        *eligible
            .choose(&mut rand::thread_rng())
            .unwrap_or(&eligible[0])
    }
}

pub fn selection_for(kind: ProxySelection) -> Box<dyn SelectionPolicy> {
    match kind {
        ProxySelection::Random => Box::new(RandomSelection),
        ProxySelection::RoundRobin => Box::<RoundRobinSelection>::default(),
    }
}
