//! One segment fetch, with its retry loop.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::http::{BodySink, HttpRequest, TaskClient};
use crate::resolver::ResolvedLink;
use crate::retry::{classify_segment_error, run_with_retry, RetryPolicy, SegmentError};
use crate::storage::PartFile;

/// Everything a segment task needs; shared by all segments of a transfer.
pub(super) struct SegmentContext {
    pub client: TaskClient,
    pub link: ResolvedLink,
    pub part: PartFile,
    pub ranged: bool,
    pub total_size: Option<u64>,
    pub policy: RetryPolicy,
}

#[derive(Debug)]
pub(super) struct SegmentResult {
    pub index: usize,
    pub attempts: u32,
    pub outcome: Result<u64, SegmentError>,
}

/// Run in a blocking thread; file writes never stall the scheduler.
pub(super) async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
}

/// Fetch `[start, end)` (or the whole body) under the retry policy.
pub(super) async fn run_segment(
    ctx: Arc<SegmentContext>,
    index: usize,
    start: u64,
    end: u64,
) -> SegmentResult {
    let affinity_bound = ctx.link.requires_proxy_affinity;
    let result = run_with_retry(
        &ctx.policy,
        |e: &SegmentError| classify_segment_error(e, affinity_bound),
        |attempt| {
            let ctx = Arc::clone(&ctx);
            async move {
                tracing::debug!(segment = index, attempt, start, end, "fetching segment");
                fetch_once(&ctx, start, end).await
            }
        },
    )
    .await;
    match result {
        Ok(done) => SegmentResult {
            index,
            attempts: done.attempts,
            outcome: Ok(done.value),
        },
        Err(failed) => SegmentResult {
            index,
            attempts: failed.attempts,
            outcome: Err(failed.value),
        },
    }
}

/// Writes a segment's body into the part file as chunks arrive, at the
/// segment's own offsets. Bytes past `limit` are counted but never written,
/// so an oversized reply cannot clobber a neighbouring segment.
struct SegmentWriter {
    part: PartFile,
    start: u64,
    limit: Option<u64>,
    /// A 200 is only the right body when the segment spans the whole file.
    whole_file: bool,
    received: Arc<AtomicU64>,
}

impl BodySink for SegmentWriter {
    fn accept(&mut self, status: u32) -> bool {
        match status {
            200 => self.whole_file,
            201..=299 => true,
            _ => false,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let len = data.len() as u64;
        let off = self.received.fetch_add(len, Ordering::Relaxed);
        let keep = match self.limit {
            Some(limit) => limit.saturating_sub(off).min(len),
            None => len,
        };
        if keep > 0 {
            self.part.write_at(self.start + off, &data[..keep as usize])?;
        }
        Ok(())
    }
}

async fn fetch_once(ctx: &SegmentContext, start: u64, end: u64) -> Result<u64, SegmentError> {
    let mut request = HttpRequest::get(&ctx.link.download_url).with_headers(&ctx.link.headers);
    let whole_file = if ctx.ranged {
        request = request.with_range(start, end);
        start == 0 && Some(end) == ctx.total_size
    } else {
        true
    };
    let expected = if ctx.ranged {
        Some(end - start)
    } else {
        ctx.total_size
    };

    let received = Arc::new(AtomicU64::new(0));
    let writer = SegmentWriter {
        part: ctx.part.clone(),
        start,
        limit: expected,
        whole_file,
        received: Arc::clone(&received),
    };
    let resp = ctx.client.send_into(request, Box::new(writer)).await?;
    if !resp.is_success() {
        return Err(SegmentError::Http(resp.status));
    }
    if resp.status == 200 && !whole_file {
        return Err(SegmentError::RangeIgnored);
    }

    let received = received.load(Ordering::Relaxed);
    if let Some(expected) = expected {
        if received != expected {
            return Err(SegmentError::PartialTransfer { expected, received });
        }
    }

    if ctx.total_size.is_none() {
        let part = ctx.part.clone();
        blocking(move || part.truncate(received)).await?;
    }
    Ok(received)
}
