use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ResolveError, ResolvedLink, Resolver};
use crate::http::{self, ProbeError, RangeSupport, TaskClient};
use crate::url_model;

/// Direct links: the share URL is already the download URL. A HEAD probe
/// fills in size, range support and a server-suggested filename.
#[derive(Debug, Clone)]
pub struct PassThroughResolver {
    max_retries: u32,
}

impl PassThroughResolver {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }
}

impl Default for PassThroughResolver {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Resolver for PassThroughResolver {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn requires_affinity(&self) -> bool {
        false
    }

    async fn resolve(
        &self,
        share_url: &str,
        client: &TaskClient,
    ) -> Result<ResolvedLink, ResolveError> {
        if url::Url::parse(share_url).is_err() {
            return Err(ResolveError::InvalidUrl(share_url.to_string()));
        }
        let head = match http::probe(client, share_url, &BTreeMap::new(), 1, Duration::ZERO).await
        {
            Ok(head) => Some(head),
            Err(ProbeError::Client(http::ClientError::Affinity(a))) => return Err(a.into()),
            Err(e) => {
                tracing::debug!(url = share_url, error = %e, "HEAD failed, metadata unknown");
                None
            }
        };
        let filename = url_model::derive_filename(
            share_url,
            head.as_ref().and_then(|h| h.content_disposition.as_deref()),
        );
        Ok(ResolvedLink {
            download_url: share_url.to_string(),
            filename,
            size_bytes: head.as_ref().and_then(|h| h.content_length),
            requires_proxy_affinity: false,
            min_wait_seconds: 0,
            max_retries: self.max_retries,
            headers: BTreeMap::new(),
            range_support: head
                .as_ref()
                .map_or(RangeSupport::Unknown, |h| h.range_support()),
            resolved_via: client.proxy().cloned(),
        })
    }
}
