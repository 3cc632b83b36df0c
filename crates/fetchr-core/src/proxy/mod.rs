//! Proxy pool and per-task proxy affinity.
//!
//! The pool is the one shared mutable resource between tasks. All access goes
//! through [`ProxyAffinityBinder`]: a task acquires one [`ProxyBinding`]
//! before resolution and holds it until its transfer ends, and every request
//! the task makes is routed through that binding.

mod binder;
mod pool;
mod select;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use binder::{ProxyAffinityBinder, ProxyBinding};
pub use pool::ProxyPool;
pub use select::{selection_for, RandomSelection, RoundRobinSelection, SelectionPolicy};

/// A proxy as handed to the transport: `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyIdentity(String);

impl ProxyIdentity {
    /// Parse one proxy list entry. Bare `host:port` gets the `http://` scheme.
    pub fn parse(entry: &str) -> Result<Self, ProxyError> {
        let entry = entry.trim();
        let candidate = if entry.contains("://") {
            entry.to_string()
        } else {
            format!("http://{entry}")
        };
        match url::Url::parse(&candidate) {
            Ok(u) if u.host_str().is_some_and(|h| !h.is_empty()) => Ok(Self(candidate)),
            _ => Err(ProxyError::InvalidEntry(entry.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy pool is empty")]
    EmptyPool,
    #[error("invalid proxy entry {0:?}")]
    InvalidEntry(String),
    #[error("read proxy list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
