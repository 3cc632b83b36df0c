//! Retry and backoff policy.
//!
//! Shared by the resolver and the transfer engine: error classification
//! (transient vs. permanent), capped exponential backoff, and an async retry
//! loop that suspends on timers instead of blocking a thread.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify_http_status, classify_segment_error, classify_transport_error};
pub use error::{SegmentError, TransferError};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{run_with_retry, Attempted};
