//! Segment and transfer error types.

use crate::http::{AffinityViolationError, ClientError, TransportError};

/// Failure of one ranged (or whole-file) GET, before retry classification.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Body shorter or longer than the requested range (server closed early,
    /// or sent more than asked for).
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Server answered a partial range with a full-body 200.
    #[error("server ignored the Range header")]
    RangeIgnored,
    /// Disk write failed. Never retried.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    #[error(transparent)]
    Affinity(#[from] AffinityViolationError),
}

impl From<ClientError> for SegmentError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Transport(TransportError::BodyWrite(msg)) => {
                SegmentError::Storage(std::io::Error::new(std::io::ErrorKind::Other, msg))
            }
            ClientError::Transport(t) => SegmentError::Transport(t),
            ClientError::Affinity(a) => SegmentError::Affinity(a),
        }
    }
}

/// Why a transfer stopped without producing a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// A segment used up its retry budget on transient failures.
    #[error("segment {segment} failed after {attempts} attempts: {message}")]
    Exhausted {
        segment: usize,
        attempts: u32,
        message: String,
    },
    /// A segment hit a non-retryable failure.
    #[error("segment {segment}: {message}")]
    Permanent { segment: usize, message: String },
    #[error(transparent)]
    Affinity(#[from] AffinityViolationError),
    #[error("storage: {0}")]
    Storage(String),
    /// External accelerator exited unsuccessfully.
    #[error("accelerator exited with {status}")]
    Accelerator { status: String },
    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// True when the failure came from a transient cause (budget ran out).
    pub fn last_error_transient(&self) -> bool {
        matches!(self, TransferError::Exhausted { .. })
    }
}
