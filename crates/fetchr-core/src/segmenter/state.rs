//! Persisted transfer state: the resolved link plus one record per segment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::range::{plan_by_target_size, PlanLimits, Segment};
use crate::resolver::ResolvedLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub index: usize,
    pub start: u64,
    /// Exclusive. For a transfer of unknown size, 0 until the body is in.
    pub end: u64,
    pub status: SegmentStatus,
    pub attempts: u32,
    pub bytes_written: u64,
}

impl SegmentRecord {
    fn new(index: usize, seg: Segment) -> Self {
        Self {
            index,
            start: seg.start,
            end: seg.end,
            status: SegmentStatus::Pending,
            attempts: 0,
            bytes_written: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_done(&self) -> bool {
        self.status == SegmentStatus::Done
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("segment {index} starts at {start}, expected {expected}")]
    Discontiguous {
        index: usize,
        start: u64,
        expected: u64,
    },
    #[error("segments cover {covered} bytes, file has {size}")]
    Coverage { covered: u64, size: u64 },
    #[error("segment {index} records {written} bytes for a {len}-byte range")]
    Overcount { index: usize, written: u64, len: u64 },
    #[error("segment {index} is done with {written} of {len} bytes")]
    ShortDone { index: usize, written: u64, len: u64 },
    #[error("a transfer of unknown size must be a single segment at offset 0")]
    UnsizedLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub task_id: String,
    pub share_url: String,
    pub dest_dir: PathBuf,
    pub link: ResolvedLink,
    /// `None` while the size is unknown (whole-file transfer).
    pub total_size: Option<u64>,
    /// Segments are fetched with Range requests.
    pub ranged: bool,
    pub segments: Vec<SegmentRecord>,
}

impl TransferState {
    /// Fresh plan. Ranged transfers of known size are split by `target_size`;
    /// everything else is one whole-file segment.
    pub fn plan(
        task_id: &str,
        share_url: &str,
        dest_dir: PathBuf,
        link: ResolvedLink,
        total_size: Option<u64>,
        ranged: bool,
        limits: PlanLimits,
    ) -> Self {
        let segments = match total_size {
            Some(size) if ranged => {
                plan_by_target_size(size, limits.target_size, limits.max_segments)
            }
            Some(0) => Vec::new(),
            Some(size) => vec![Segment { start: 0, end: size }],
            None => vec![Segment { start: 0, end: 0 }],
        };
        Self {
            task_id: task_id.to_string(),
            share_url: share_url.to_string(),
            dest_dir,
            link,
            total_size,
            ranged: ranged && total_size.is_some(),
            segments: segments
                .into_iter()
                .enumerate()
                .map(|(i, s)| SegmentRecord::new(i, s))
                .collect(),
        }
    }

    /// Check the coverage and byte-count invariants.
    pub fn reconcile(&self) -> Result<(), StateError> {
        let Some(size) = self.total_size else {
            return match self.segments.as_slice() {
                [only] if only.start == 0 => Ok(()),
                _ => Err(StateError::UnsizedLayout),
            };
        };
        let mut expected = 0u64;
        for seg in &self.segments {
            if seg.start != expected || seg.end < seg.start {
                return Err(StateError::Discontiguous {
                    index: seg.index,
                    start: seg.start,
                    expected,
                });
            }
            if seg.bytes_written > seg.len() {
                return Err(StateError::Overcount {
                    index: seg.index,
                    written: seg.bytes_written,
                    len: seg.len(),
                });
            }
            if seg.is_done() && seg.bytes_written != seg.len() {
                return Err(StateError::ShortDone {
                    index: seg.index,
                    written: seg.bytes_written,
                    len: seg.len(),
                });
            }
            expected = seg.end;
        }
        if expected != size {
            return Err(StateError::Coverage {
                covered: expected,
                size,
            });
        }
        Ok(())
    }

    /// After a reload, anything that was in flight is redone from scratch.
    pub fn reset_unfinished(&mut self) {
        for seg in &mut self.segments {
            if !seg.is_done() {
                seg.status = SegmentStatus::Pending;
                seg.bytes_written = 0;
            }
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes_written).sum()
    }

    pub fn segments_done(&self) -> usize {
        self.segments.iter().filter(|s| s.is_done()).count()
    }

    pub fn all_done(&self) -> bool {
        self.segments.iter().all(SegmentRecord::is_done)
    }

    /// Indices still to fetch, in file order.
    pub fn pending(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| !s.is_done())
            .map(|s| s.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RangeSupport;

    fn link() -> ResolvedLink {
        ResolvedLink {
            download_url: "https://dl.example/f.bin".into(),
            filename: "f.bin".into(),
            size_bytes: Some(100),
            requires_proxy_affinity: false,
            min_wait_seconds: 0,
            max_retries: 5,
            headers: Default::default(),
            range_support: RangeSupport::Supported,
            resolved_via: None,
        }
    }

    fn state(size: Option<u64>, ranged: bool) -> TransferState {
        TransferState::plan(
            "t1",
            "https://share/x",
            PathBuf::from("/tmp"),
            link(),
            size,
            ranged,
            PlanLimits {
                target_size: 30,
                max_segments: 16,
            },
        )
    }

    #[test]
    fn plan_ranged_known_size() {
        let s = state(Some(100), true);
        assert!(s.ranged);
        assert_eq!(s.segments.len(), 4);
        assert!(s.segments.iter().all(|r| r.status == SegmentStatus::Pending));
        assert_eq!(s.pending(), vec![0, 1, 2, 3]);
        s.reconcile().unwrap();
    }

    #[test]
    fn plan_whole_file_modes() {
        let s = state(Some(100), false);
        assert_eq!(s.segments.len(), 1);
        assert_eq!(s.segments[0].len(), 100);
        s.reconcile().unwrap();

        let s = state(None, true);
        assert!(!s.ranged);
        assert_eq!(s.segments.len(), 1);
        s.reconcile().unwrap();

        let s = state(Some(0), true);
        assert!(s.segments.is_empty());
        assert!(s.all_done());
        s.reconcile().unwrap();
    }

    #[test]
    fn reconcile_rejects_broken_states() {
        let mut s = state(Some(100), true);
        s.segments[1].start += 1;
        assert!(matches!(s.reconcile(), Err(StateError::Discontiguous { index: 1, .. })));

        let mut s = state(Some(100), true);
        s.segments.pop();
        assert!(matches!(s.reconcile(), Err(StateError::Coverage { .. })));

        let mut s = state(Some(100), true);
        s.segments[0].bytes_written = s.segments[0].len() + 1;
        assert!(matches!(s.reconcile(), Err(StateError::Overcount { .. })));

        let mut s = state(Some(100), true);
        s.segments[2].status = SegmentStatus::Done;
        assert!(matches!(s.reconcile(), Err(StateError::ShortDone { .. })));
    }

    #[test]
    fn reset_unfinished_keeps_done() {
        let mut s = state(Some(100), true);
        let len0 = s.segments[0].len();
        s.segments[0].status = SegmentStatus::Done;
        s.segments[0].bytes_written = len0;
        s.segments[1].status = SegmentStatus::InFlight;
        s.segments[1].bytes_written = 5;
        s.segments[2].status = SegmentStatus::Failed;
        s.reset_unfinished();
        assert_eq!(s.segments[0].status, SegmentStatus::Done);
        assert_eq!(s.segments[1].status, SegmentStatus::Pending);
        assert_eq!(s.segments[1].bytes_written, 0);
        assert_eq!(s.pending(), vec![1, 2, 3]);
        assert_eq!(s.bytes_done(), len0);
        assert_eq!(s.segments_done(), 1);
        s.reconcile().unwrap();
    }

    #[test]
    fn json_roundtrip_keeps_statuses_and_counts() {
        let mut s = state(Some(100), true);
        s.segments[0].status = SegmentStatus::Done;
        s.segments[0].bytes_written = s.segments[0].len();
        s.segments[0].attempts = 3;
        s.segments[1].status = SegmentStatus::Failed;
        s.segments[1].attempts = 5;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(serde_json::from_str::<TransferState>(&json).unwrap(), s);
    }
}
