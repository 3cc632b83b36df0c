use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ExLoadResolver, PassThroughResolver, Resolver};
use crate::config::{FetchrConfig, HostConfig};
use crate::url_model;

/// Instantiate the resolver variant named in a host entry.
pub fn build_resolver(host: &HostConfig) -> Result<Arc<dyn Resolver>> {
    Ok(match host.resolver.as_str() {
        "exload" => {
            let mut r = ExLoadResolver::new(host.max_retries);
            if let Some(secs) = host.countdown_secs {
                r = r.with_countdown(Duration::from_secs(secs));
            }
            Arc::new(r)
        }
        "passthrough" => Arc::new(PassThroughResolver::new(host.max_retries)),
        other => bail!("unknown resolver variant {other:?}"),
    })
}

/// Host id → resolver, with a pass-through fallback for everything else.
#[derive(Clone)]
pub struct ResolverRegistry {
    by_host: BTreeMap<String, Arc<dyn Resolver>>,
    fallback: Arc<dyn Resolver>,
}

impl ResolverRegistry {
    pub fn new(fallback: Arc<dyn Resolver>) -> Self {
        Self {
            by_host: BTreeMap::new(),
            fallback,
        }
    }

    pub fn from_config(cfg: &FetchrConfig) -> Result<Self> {
        let fallback = Arc::new(PassThroughResolver::new(HostConfig::default().max_retries));
        let mut registry = Self::new(fallback);
        for (host_id, host) in &cfg.hosts {
            registry.register(host_id, build_resolver(host)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, host_id: &str, resolver: Arc<dyn Resolver>) {
        self.by_host.insert(host_id.to_ascii_lowercase(), resolver);
    }

    pub fn get(&self, host_id: &str) -> Option<Arc<dyn Resolver>> {
        self.by_host.get(host_id).cloned()
    }

    /// Resolver for a share URL's host, or the fallback.
    pub fn resolver_for(&self, share_url: &str) -> Arc<dyn Resolver> {
        url_model::host_id(share_url)
            .and_then(|h| self.get(&h))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Registered host ids, sorted.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.by_host.keys().map(String::as_str)
    }
}
