/// Byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Segment sizing for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub target_size: u64,
    pub max_segments: usize,
}

/// Split `total_size` into `segment_count` near-equal segments; earlier
/// segments absorb the remainder one byte each.
pub fn plan_segments(total_size: u64, segment_count: usize) -> Vec<Segment> {
    if total_size == 0 || segment_count == 0 {
        return Vec::new();
    }
    let count = (segment_count as u64).min(total_size);
    let base = total_size / count;
    let remainder = total_size % count;

    let mut offset = 0u64;
    (0..count)
        .map(|i| {
            let len = base + u64::from(i < remainder);
            let seg = Segment {
                start: offset,
                end: offset + len,
            };
            offset = seg.end;
            seg
        })
        .collect()
}

/// Plan segments of roughly `target_size` bytes, never more than `max_segments`.
pub fn plan_by_target_size(total_size: u64, target_size: u64, max_segments: usize) -> Vec<Segment> {
    if total_size == 0 {
        return Vec::new();
    }
    let wanted = if target_size == 0 {
        1
    } else {
        total_size.div_ceil(target_size)
    };
    let count = wanted.clamp(1, max_segments.max(1) as u64) as usize;
    plan_segments(total_size, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(segs: &[Segment], total: u64) {
        let mut expected_start = 0;
        for s in segs {
            assert_eq!(s.start, expected_start, "gap or overlap at {}", s.start);
            assert!(!s.is_empty());
            expected_start = s.end;
        }
        assert_eq!(expected_start, total);
        assert_eq!(segs.iter().map(Segment::len).sum::<u64>(), total);
    }

    #[test]
    fn remainder_goes_to_leading_segments() {
        let segs = plan_segments(10, 4);
        let lens: Vec<u64> = segs.iter().map(Segment::len).collect();
        assert_eq!(lens, vec![3, 3, 2, 2]);
        assert_partition(&segs, 10);
    }

    #[test]
    fn more_segments_than_bytes() {
        let segs = plan_segments(3, 8);
        assert_eq!(segs.len(), 3);
        assert_partition(&segs, 3);
    }

    #[test]
    fn empty_inputs() {
        assert!(plan_segments(0, 4).is_empty());
        assert!(plan_segments(100, 0).is_empty());
        assert!(plan_by_target_size(0, 10, 4).is_empty());
    }

    #[test]
    fn target_size_planning() {
        assert_eq!(plan_by_target_size(100, 1000, 16).len(), 1);
        assert_eq!(plan_by_target_size(100, 25, 16).len(), 4);
        assert_eq!(plan_by_target_size(101, 25, 16).len(), 5);
        assert_eq!(plan_by_target_size(10_000, 1, 16).len(), 16);
        assert_eq!(plan_by_target_size(100, 0, 16).len(), 1);
    }

    #[test]
    fn partition_holds_across_sizes() {
        for total in [1u64, 2, 7, 64, 999, 1 << 20, (1 << 20) + 3, 123_456_789] {
            for target in [1u64, 3, 1000, 8 << 20] {
                for max in [1usize, 2, 5, 16] {
                    let segs = plan_by_target_size(total, target, max);
                    assert!(segs.len() <= max);
                    assert_partition(&segs, total);
                }
            }
        }
    }
}
