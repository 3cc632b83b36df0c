//! Transfer engine: resolved link in, assembled file out.
//!
//! A transfer moves through planning (resume a persisted state or split the
//! file into segments), transferring (each pending segment fetched under the
//! retry policy, state persisted after every completion), and assembling
//! (byte count verified, temp file renamed into place). When the host is
//! configured for it, the whole transfer is handed to an external
//! accelerator instead.

mod accelerator;
mod budget;
mod progress;
mod segment;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::{AcceleratorConfig, FetchrConfig, HostConfig};
use crate::control::CancelToken;
use crate::http::{self, RangeSupport, TaskClient};
use crate::resolver::ResolvedLink;
use crate::resume_db::ResumeDb;
use crate::retry::{classify_segment_error, RetryPolicy, SegmentError, TransferError};
use crate::segmenter::{PlanLimits, SegmentStatus, TransferState};
use crate::storage::{self, PartFile};

pub use accelerator::{accelerator_args, run_accelerator};
pub use budget::{BudgetGuard, GlobalConnectionBudget};
pub use progress::{spawn_progress_callback, Phase, ProgressReporter, ProgressStats};

use segment::{blocking, run_segment, SegmentContext, SegmentResult};

/// Per-transfer knobs, normally derived from the host entry.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub limits: PlanLimits,
    /// Concurrent segment connections for this transfer.
    pub max_connections: usize,
    /// Backoff shape; the attempt budget comes from the link.
    pub retry: RetryPolicy,
    pub accelerator: Option<AcceleratorConfig>,
    /// Pause between HEAD retries when the size must be probed.
    pub probe_pause: Duration,
}

impl TransferSettings {
    pub fn for_host(cfg: &FetchrConfig, host: &HostConfig) -> Self {
        Self {
            limits: PlanLimits {
                target_size: cfg.segment_size_bytes,
                max_segments: cfg.max_segments,
            },
            max_connections: host.max_connections.max(1),
            retry: cfg.retry_config().policy_with_attempts(host.max_retries),
            accelerator: host
                .accelerator_enabled
                .then(|| cfg.accelerator.clone().unwrap_or_default()),
            probe_pause: Duration::from_millis(500),
        }
    }
}

/// One transfer request. Borrowed for the duration of [`TransferEngine::run`].
pub struct TransferJob<'a> {
    pub task_id: &'a str,
    pub share_url: &'a str,
    pub dest_dir: &'a Path,
    pub link: &'a ResolvedLink,
    /// Carries the task's proxy binding, if any.
    pub client: &'a TaskClient,
    pub settings: &'a TransferSettings,
    pub cancel: Option<&'a CancelToken>,
    pub progress: Option<&'a ProgressReporter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transferred {
    pub path: PathBuf,
    pub bytes: u64,
    /// Continued from a persisted state.
    pub resumed: bool,
    /// Attempts per segment, earlier runs included. Empty for delegated transfers.
    pub segment_attempts: Vec<u32>,
}

#[derive(Clone)]
pub struct TransferEngine {
    db: ResumeDb,
    budget: Arc<GlobalConnectionBudget>,
}

fn storage_error(e: anyhow::Error) -> TransferError {
    TransferError::Storage(format!("{e:#}"))
}

fn io_error(e: std::io::Error) -> TransferError {
    TransferError::Storage(e.to_string())
}

fn is_cancelled(token: Option<&CancelToken>) -> bool {
    token.is_some_and(CancelToken::is_cancelled)
}

/// Never resolves when there is no token.
async fn wait_cancelled(token: Option<&CancelToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

fn segment_failure(index: usize, attempts: u32, err: SegmentError, transient: bool) -> TransferError {
    match err {
        SegmentError::Affinity(a) => TransferError::Affinity(a),
        SegmentError::Storage(io) => TransferError::Storage(io.to_string()),
        other if transient => TransferError::Exhausted {
            segment: index,
            attempts,
            message: other.to_string(),
        },
        other => TransferError::Permanent {
            segment: index,
            message: other.to_string(),
        },
    }
}

/// Why a persisted state can't be continued, if it can't.
fn stale_reason(
    prev: &TransferState,
    link: &ResolvedLink,
    size: Option<u64>,
    support: RangeSupport,
    temp: &Path,
) -> Option<String> {
    if prev.link.filename != link.filename {
        return Some(format!(
            "filename changed from {:?} to {:?}",
            prev.link.filename, link.filename
        ));
    }
    let stored = match (prev.total_size, size) {
        (Some(stored), Some(remote)) if stored == remote => stored,
        (stored, remote) => {
            return Some(format!("size changed: stored {stored:?}, remote {remote:?}"))
        }
    };
    if prev.ranged && support != RangeSupport::Supported && !prev.all_done() {
        return Some("remote no longer serves ranges".to_string());
    }
    match std::fs::metadata(temp) {
        Ok(meta) if meta.len() == stored => {}
        Ok(meta) => return Some(format!("temp file is {} bytes, expected {stored}", meta.len())),
        Err(_) => return Some(format!("temp file {} is missing", temp.display())),
    }
    prev.reconcile().err().map(|e| e.to_string())
}

impl TransferEngine {
    pub fn new(db: ResumeDb, budget: Arc<GlobalConnectionBudget>) -> Self {
        Self { db, budget }
    }

    pub fn db(&self) -> &ResumeDb {
        &self.db
    }

    pub fn budget(&self) -> &Arc<GlobalConnectionBudget> {
        &self.budget
    }

    pub async fn run(&self, job: TransferJob<'_>) -> Result<Transferred, TransferError> {
        job.client.check_link(job.link)?;
        if let Some(acc) = &job.settings.accelerator {
            return self.run_delegated(&job, acc).await;
        }

        let started = Instant::now();
        report(&job, None, Phase::Planning, started);
        let (mut state, part, resumed) = match self.plan(&job).await {
            Ok(planned) => planned,
            Err(e) => {
                report(&job, None, Phase::Failed, started);
                return Err(e);
            }
        };

        report(&job, Some(&state), Phase::Transferring, started);
        if let Err(e) = self.transfer(&job, &mut state, &part, started).await {
            if e != TransferError::Cancelled {
                report(&job, Some(&state), Phase::Failed, started);
            }
            return Err(e);
        }

        report(&job, Some(&state), Phase::Assembling, started);
        let (path, bytes) = match self.assemble(&job, &state, part).await {
            Ok(done) => done,
            Err(e) => {
                report(&job, Some(&state), Phase::Failed, started);
                return Err(e);
            }
        };
        report(&job, Some(&state), Phase::Complete, started);
        tracing::info!(
            task_id = job.task_id,
            path = %path.display(),
            bytes,
            resumed,
            "transfer complete"
        );
        Ok(Transferred {
            path,
            bytes,
            resumed,
            segment_attempts: state.segments.iter().map(|s| s.attempts).collect(),
        })
    }

    /// Size and range support, probing when the resolver left either open.
    /// A failed probe means whole-file mode, not a failed transfer.
    async fn remote_metadata(&self, job: &TransferJob<'_>) -> (Option<u64>, RangeSupport) {
        let link = job.link;
        if link.size_bytes.is_some() && link.range_support != RangeSupport::Unknown {
            return (link.size_bytes, link.range_support);
        }
        match http::probe(
            job.client,
            &link.download_url,
            &link.headers,
            link.max_retries,
            job.settings.probe_pause,
        )
        .await
        {
            Ok(head) => {
                let support = match link.range_support {
                    RangeSupport::Unknown => head.range_support(),
                    known => known,
                };
                (link.size_bytes.or(head.content_length), support)
            }
            Err(e) => {
                tracing::debug!(task_id = job.task_id, error = %e, "metadata probe failed");
                (link.size_bytes, link.range_support)
            }
        }
    }

    async fn plan(&self, job: &TransferJob<'_>) -> Result<(TransferState, PartFile, bool), TransferError> {
        let (size, support) = self.remote_metadata(job).await;
        let temp = storage::temp_path(job.dest_dir, &job.link.filename, job.task_id);

        if let Some(prev) = self.db.load_transfer(job.task_id).await.map_err(storage_error)? {
            match stale_reason(&prev, job.link, size, support, &temp) {
                None => {
                    let mut state = prev;
                    state.link = job.link.clone();
                    state.reset_unfinished();
                    let path = temp.clone();
                    let part = blocking(move || PartFile::open_existing(&path))
                        .await
                        .map_err(io_error)?;
                    tracing::info!(
                        task_id = job.task_id,
                        done = state.segments_done(),
                        total = state.segments.len(),
                        "resuming transfer"
                    );
                    return Ok((state, part, true));
                }
                Some(reason) => {
                    tracing::warn!(task_id = job.task_id, %reason, "discarding persisted transfer state");
                    self.db
                        .delete_transfer(job.task_id)
                        .await
                        .map_err(storage_error)?;
                }
            }
        }

        let mut link = job.link.clone();
        link.size_bytes = size;
        link.range_support = support;
        let ranged = support == RangeSupport::Supported;
        let state = TransferState::plan(
            job.task_id,
            job.share_url,
            job.dest_dir.to_path_buf(),
            link,
            size,
            ranged,
            job.settings.limits,
        );

        tokio::fs::create_dir_all(job.dest_dir)
            .await
            .map_err(io_error)?;
        let part = blocking(move || PartFile::create(&temp, size))
            .await
            .map_err(io_error)?;
        self.db.save_transfer(&state).await.map_err(storage_error)?;
        tracing::debug!(
            task_id = job.task_id,
            size = ?size,
            ranged = state.ranged,
            segments = state.segments.len(),
            "planned transfer"
        );
        Ok((state, part, false))
    }

    /// Fetch every pending segment. The state is persisted after each
    /// segment settles, before the next one is dispatched.
    async fn transfer(
        &self,
        job: &TransferJob<'_>,
        state: &mut TransferState,
        part: &PartFile,
        started: Instant,
    ) -> Result<(), TransferError> {
        let mut queue: VecDeque<usize> = state.pending().into();
        if queue.is_empty() {
            return Ok(());
        }

        let wanted = job.settings.max_connections.min(queue.len());
        let guard = tokio::select! {
            guard = self.budget.acquire(wanted) => guard,
            _ = wait_cancelled(job.cancel) => return Err(TransferError::Cancelled),
        };
        let concurrency = guard.reserved();

        let affinity_bound = state.link.requires_proxy_affinity;
        let ctx = Arc::new(SegmentContext {
            client: job.client.clone(),
            link: state.link.clone(),
            part: part.clone(),
            ranged: state.ranged,
            total_size: state.total_size,
            policy: job.settings.retry.with_max_attempts(state.link.max_retries),
        });
        tracing::info!(
            task_id = job.task_id,
            pending = queue.len(),
            concurrency,
            ranged = state.ranged,
            "transferring"
        );

        let mut running = JoinSet::new();
        let mut permanent: Option<TransferError> = None;
        let mut exhausted: Option<TransferError> = None;
        let mut cancelled = false;

        loop {
            while permanent.is_none() && !cancelled && running.len() < concurrency {
                if is_cancelled(job.cancel) {
                    cancelled = true;
                    break;
                }
                let Some(index) = queue.pop_front() else { break };
                let seg = &mut state.segments[index];
                seg.status = SegmentStatus::InFlight;
                running.spawn(run_segment(Arc::clone(&ctx), index, seg.start, seg.end));
            }
            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = running.join_next() => joined,
                _ = wait_cancelled(job.cancel), if !cancelled => {
                    cancelled = true;
                    running.abort_all();
                    continue;
                }
            };
            let Some(joined) = joined else { break };
            let result: SegmentResult = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    permanent.get_or_insert(TransferError::Storage(format!(
                        "segment worker failed: {e}"
                    )));
                    continue;
                }
            };

            let index = result.index;
            let rec = &mut state.segments[index];
            rec.attempts += result.attempts;
            match result.outcome {
                Ok(bytes) => {
                    if state.total_size.is_none() {
                        rec.end = rec.start + bytes;
                    }
                    rec.bytes_written = bytes;
                    rec.status = SegmentStatus::Done;
                    tracing::debug!(
                        task_id = job.task_id,
                        segment = index,
                        attempts = result.attempts,
                        bytes,
                        "segment done"
                    );
                    if state.total_size.is_none() {
                        state.total_size = Some(bytes);
                    }
                }
                Err(err) => {
                    rec.status = SegmentStatus::Failed;
                    rec.bytes_written = 0;
                    let transient = classify_segment_error(&err, affinity_bound).is_transient();
                    let failure = segment_failure(index, result.attempts, err, transient);
                    tracing::warn!(
                        task_id = job.task_id,
                        segment = index,
                        attempts = result.attempts,
                        error = %failure,
                        "segment failed"
                    );
                    if transient {
                        exhausted.get_or_insert(failure);
                    } else {
                        permanent.get_or_insert(failure);
                    }
                }
            }
            self.db.save_transfer(state).await.map_err(storage_error)?;
            report(job, Some(&*state), Phase::Transferring, started);
        }
        drop(guard);

        if cancelled || permanent.is_some() {
            for seg in &mut state.segments {
                if seg.status == SegmentStatus::InFlight {
                    seg.status = SegmentStatus::Pending;
                    seg.bytes_written = 0;
                }
            }
            self.db.save_transfer(state).await.map_err(storage_error)?;
        }
        if cancelled {
            tracing::info!(task_id = job.task_id, "transfer cancelled, state saved");
            return Err(TransferError::Cancelled);
        }
        match permanent.or(exhausted) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn assemble(
        &self,
        job: &TransferJob<'_>,
        state: &TransferState,
        part: PartFile,
    ) -> Result<(PathBuf, u64), TransferError> {
        let written = state.bytes_done();
        let expected = state.total_size.unwrap_or(written);
        let on_disk = part.len().map_err(io_error)?;
        if !state.all_done() || written != expected || on_disk != expected {
            return Err(TransferError::Storage(format!(
                "assembled {written} of {expected} bytes ({on_disk} on disk)"
            )));
        }

        let dir = job.dest_dir.to_path_buf();
        let filename = state.link.filename.clone();
        let path = blocking(move || part.finalize(&dir, &filename))
            .await
            .map_err(io_error)?;
        if let Err(e) = self.db.delete_transfer(job.task_id).await {
            tracing::warn!(task_id = job.task_id, error = %e, "could not drop finished transfer state");
        }
        Ok((path, written))
    }

    async fn run_delegated(
        &self,
        job: &TransferJob<'_>,
        acc: &AcceleratorConfig,
    ) -> Result<Transferred, TransferError> {
        let started = Instant::now();
        report(job, None, Phase::Transferring, started);
        tokio::fs::create_dir_all(job.dest_dir)
            .await
            .map_err(io_error)?;

        // An accelerator control file means an earlier run left a partial
        // file under the plain name; reuse it so the child can continue.
        let filename = &job.link.filename;
        let control_file = job.dest_dir.join(format!("{filename}.aria2"));
        let out = if control_file.exists() {
            job.dest_dir.join(filename)
        } else {
            storage::available_path(job.dest_dir, filename)
        };
        let out_name = out
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename.as_str())
            .to_string();

        let result = tokio::select! {
            r = run_accelerator(acc, job.link, job.dest_dir, &out_name, job.client.proxy()) => r,
            _ = wait_cancelled(job.cancel) => return Err(TransferError::Cancelled),
        };
        let path = match result {
            Ok(path) => path,
            Err(e) => {
                report(job, None, Phase::Failed, started);
                return Err(e);
            }
        };
        let bytes = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if let Some(progress) = job.progress {
            progress.report(ProgressStats {
                task_id: job.task_id.to_string(),
                phase: Phase::Complete,
                bytes_done: bytes,
                total_bytes: Some(bytes),
                elapsed_secs: started.elapsed().as_secs_f64(),
                segments_done: 0,
                segment_count: 0,
            });
        }
        Ok(Transferred {
            path,
            bytes,
            resumed: false,
            segment_attempts: Vec::new(),
        })
    }
}

fn report(job: &TransferJob<'_>, state: Option<&TransferState>, phase: Phase, started: Instant) {
    let Some(progress) = job.progress else { return };
    let stats = match state {
        Some(state) => ProgressStats {
            task_id: job.task_id.to_string(),
            phase,
            bytes_done: state.bytes_done(),
            total_bytes: state.total_size,
            elapsed_secs: started.elapsed().as_secs_f64(),
            segments_done: state.segments_done(),
            segment_count: state.segments.len(),
        },
        None => ProgressStats {
            task_id: job.task_id.to_string(),
            phase,
            bytes_done: 0,
            total_bytes: job.link.size_bytes,
            elapsed_secs: started.elapsed().as_secs_f64(),
            segments_done: 0,
            segment_count: 0,
        },
    };
    progress.report(stats);
}
