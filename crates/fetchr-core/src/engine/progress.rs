//! Progress snapshots and non-blocking delivery.
//!
//! The transfer loop never waits on a progress consumer: updates are
//! rate-limited and pushed with `try_send`, so a slow consumer only loses
//! intermediate snapshots.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Transferring,
    Assembling,
    Complete,
    Failed,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressStats {
    pub task_id: String,
    pub phase: Phase,
    pub bytes_done: u64,
    /// `None` while the size is unknown.
    pub total_bytes: Option<u64>,
    pub elapsed_secs: f64,
    pub segments_done: usize,
    pub segment_count: usize,
}

impl ProgressStats {
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Seconds remaining at the current average rate.
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes?.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        (rate > 0.0).then(|| remaining as f64 / rate)
    }

    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes? {
            0 => Some(1.0),
            total => Some((self.bytes_done as f64 / total as f64).min(1.0)),
        }
    }
}

/// Sending half handed to the engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressStats>,
    min_interval: Duration,
    last_sent: Arc<Mutex<Option<(Instant, Phase)>>>,
}

impl ProgressReporter {
    pub fn channel(capacity: usize, min_interval: Duration) -> (Self, mpsc::Receiver<ProgressStats>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                min_interval,
                last_sent: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// Offer a snapshot. Phase changes always go through (queue permitting);
    /// same-phase updates closer than `min_interval` are dropped.
    pub fn report(&self, stats: ProgressStats) {
        let mut last = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let due = match *last {
            None => true,
            Some((at, phase)) => {
                phase != stats.phase
                    || stats.phase.is_terminal()
                    || now.duration_since(at) >= self.min_interval
            }
        };
        if !due {
            return;
        }
        let phase = stats.phase;
        if self.tx.try_send(stats).is_ok() {
            *last = Some((now, phase));
        }
    }
}

/// Drive a plain `(bytes_done, total_bytes)` callback from a reporter.
/// The task ends when every reporter clone is dropped.
pub fn spawn_progress_callback<F>(
    min_interval: Duration,
    mut callback: F,
) -> (ProgressReporter, JoinHandle<()>)
where
    F: FnMut(u64, Option<u64>) + Send + 'static,
{
    let (reporter, mut rx) = ProgressReporter::channel(16, min_interval);
    let handle = tokio::spawn(async move {
        while let Some(stats) = rx.recv().await {
            callback(stats.bytes_done, stats.total_bytes);
        }
    });
    (reporter, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(phase: Phase, bytes: u64) -> ProgressStats {
        ProgressStats {
            task_id: "t".into(),
            phase,
            bytes_done: bytes,
            total_bytes: Some(1000),
            elapsed_secs: 2.0,
            segments_done: 0,
            segment_count: 4,
        }
    }

    #[test]
    fn rate_eta_fraction() {
        let s = stats(Phase::Transferring, 500);
        assert_eq!(s.bytes_per_sec(), 250.0);
        assert_eq!(s.eta_secs(), Some(2.0));
        assert_eq!(s.fraction(), Some(0.5));

        let mut unknown = stats(Phase::Transferring, 500);
        unknown.total_bytes = None;
        assert_eq!(unknown.eta_secs(), None);
        assert_eq!(unknown.fraction(), None);

        let mut idle = stats(Phase::Planning, 0);
        idle.elapsed_secs = 0.0;
        assert_eq!(idle.bytes_per_sec(), 0.0);
        assert_eq!(idle.eta_secs(), None);
    }

    #[tokio::test]
    async fn rate_limited_but_phase_changes_pass() {
        let (reporter, mut rx) = ProgressReporter::channel(16, Duration::from_secs(3600));
        reporter.report(stats(Phase::Transferring, 1));
        reporter.report(stats(Phase::Transferring, 2));
        reporter.report(stats(Phase::Transferring, 3));
        reporter.report(stats(Phase::Complete, 1000));
        drop(reporter);
        let mut got = Vec::new();
        while let Some(s) = rx.recv().await {
            got.push((s.phase, s.bytes_done));
        }
        assert_eq!(got, vec![(Phase::Transferring, 1), (Phase::Complete, 1000)]);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (reporter, _rx) = ProgressReporter::channel(1, Duration::ZERO);
        for i in 0..100 {
            reporter.report(stats(Phase::Transferring, i));
        }
    }

    #[tokio::test]
    async fn callback_adapter_sees_bytes_and_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (reporter, handle) = spawn_progress_callback(Duration::ZERO, move |done, total| {
            sink.lock().unwrap().push((done, total));
        });
        reporter.report(stats(Phase::Transferring, 10));
        reporter.report(stats(Phase::Complete, 1000));
        drop(reporter);
        handle.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(10, Some(1000)), (1000, Some(1000))]);
    }
}
