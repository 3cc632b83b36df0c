//! Host resolvers: share URL in, [`ResolvedLink`] out.
//!
//! Each supported host is one [`Resolver`] implementation. Shared code never
//! branches on host name; the [`ResolverRegistry`] maps host ids to
//! implementations and falls back to [`PassThroughResolver`].

mod error;
mod exload;
mod passthrough;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::http::{RangeSupport, TaskClient};
use crate::proxy::ProxyIdentity;

pub use error::ResolveError;
pub use exload::{ExLoadResolver, DEFAULT_COUNTDOWN};
pub use passthrough::PassThroughResolver;
pub use registry::{build_resolver, ResolverRegistry};

/// A concrete download endpoint plus the constraints for fetching it.
///
/// Owned by the task that resolved it. When `requires_proxy_affinity` is set,
/// only a client on the route recorded in `resolved_via` may fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub download_url: String,
    pub filename: String,
    /// Unknown until probed.
    pub size_bytes: Option<u64>,
    pub requires_proxy_affinity: bool,
    pub min_wait_seconds: u64,
    pub max_retries: u32,
    /// Extra request headers the endpoint expects.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub range_support: RangeSupport,
    /// Proxy the link was resolved through (`None` = direct).
    #[serde(default)]
    pub resolved_via: Option<ProxyIdentity>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Variant name as used in configuration (`exload`, `passthrough`).
    fn name(&self) -> &'static str;

    /// Whether every request of a task must leave through one proxy.
    fn requires_affinity(&self) -> bool;

    /// Resolve `share_url`. Every request goes through `client`, which
    /// carries the task's proxy binding when there is one.
    async fn resolve(&self, share_url: &str, client: &TaskClient)
        -> Result<ResolvedLink, ResolveError>;
}
