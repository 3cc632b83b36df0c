//! Segment planning and per-transfer segment bookkeeping.
//!
//! A file of known size is split into disjoint, contiguous half-open ranges
//! covering `[0, size)`. Boundaries are fixed at planning time and persisted
//! with the transfer so a resume reuses them.

mod range;
mod state;

pub use range::{plan_by_target_size, plan_segments, PlanLimits, Segment};
pub use state::{SegmentRecord, SegmentStatus, StateError, TransferState};
