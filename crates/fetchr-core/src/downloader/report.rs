use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::resolver::ResolveError;
use crate::retry::TransferError;

/// Terminal error class of a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Resolution,
    Transient,
    Permanent,
    Affinity,
    Storage,
    Accelerator,
    Proxy,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Resolution => "resolution",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Affinity => "affinity",
            FailureKind::Storage => "storage",
            FailureKind::Accelerator => "accelerator",
            FailureKind::Proxy => "proxy",
            FailureKind::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        path: PathBuf,
        bytes: u64,
    },
    Failed {
        kind: FailureKind,
        message: String,
        /// Message of the last transient error seen before giving up.
        last_transient: Option<String>,
    },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub(super) fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind,
            message: message.into(),
            last_transient: None,
        }
    }

    pub(super) fn from_resolve(e: &ResolveError, last_transient: Option<String>) -> Self {
        let kind = match e {
            ResolveError::Affinity(_) => FailureKind::Affinity,
            _ => FailureKind::Resolution,
        };
        TaskOutcome::Failed {
            kind,
            message: e.to_string(),
            last_transient,
        }
    }

    pub(super) fn from_transfer(e: &TransferError) -> Self {
        let (kind, last_transient) = match e {
            TransferError::Exhausted { message, .. } => {
                (FailureKind::Transient, Some(message.clone()))
            }
            TransferError::Permanent { .. } => (FailureKind::Permanent, None),
            TransferError::Affinity(_) => (FailureKind::Affinity, None),
            TransferError::Storage(_) => (FailureKind::Storage, None),
            TransferError::Accelerator { .. } => (FailureKind::Accelerator, None),
            TransferError::Cancelled => (FailureKind::Cancelled, None),
        };
        TaskOutcome::Failed {
            kind,
            message: e.to_string(),
            last_transient,
        }
    }
}

/// What happened to one share URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub share_url: String,
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}
