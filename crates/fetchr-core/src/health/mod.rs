//! Host health checks: resolve a known-good probe URL end to end.
//!
//! A check stops after resolution (which includes the resolver's metadata
//! probe); nothing is downloaded. Checks share no mutable state, so
//! `check_all` simply runs them side by side.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;

use crate::config::{FetchrConfig, HostConfig};
use crate::http::{HttpTransport, TaskClient};
use crate::proxy::ProxyAffinityBinder;
use crate::resolver::ResolverRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub host_id: String,
    pub success: bool,
    pub message: String,
    /// Unix seconds when the check finished.
    pub timestamp: i64,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct HealthChecker {
    registry: ResolverRegistry,
    transport: Arc<dyn HttpTransport>,
    binder: Option<ProxyAffinityBinder>,
    probes: BTreeMap<String, String>,
    host_settings: BTreeMap<String, HostConfig>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl HealthChecker {
    pub fn new(
        registry: ResolverRegistry,
        transport: Arc<dyn HttpTransport>,
        binder: Option<ProxyAffinityBinder>,
    ) -> Self {
        Self {
            registry,
            transport,
            binder,
            probes: BTreeMap::new(),
            host_settings: BTreeMap::new(),
        }
    }

    /// Checker with the `[health.<host>]` probe URLs from the config.
    pub fn from_config(
        cfg: &FetchrConfig,
        registry: ResolverRegistry,
        transport: Arc<dyn HttpTransport>,
        binder: Option<ProxyAffinityBinder>,
    ) -> Self {
        let checker = cfg
            .hosts
            .iter()
            .fold(Self::new(registry, transport, binder), |checker, (host, settings)| {
                checker.with_host_settings(host, settings.clone())
            });
        cfg.health.iter().fold(checker, |checker, (host, probe)| {
            checker.with_probe(host, &probe.probe_url)
        })
    }

    /// Host entry consulted for `use_proxy_affinity`; unknown hosts use the default.
    pub fn with_host_settings(mut self, host_id: &str, settings: HostConfig) -> Self {
        self.host_settings
            .insert(host_id.to_ascii_lowercase(), settings);
        self
    }

    pub fn with_probe(mut self, host_id: &str, probe_url: &str) -> Self {
        self.probes
            .insert(host_id.to_ascii_lowercase(), probe_url.to_string());
        self
    }

    /// Registered hosts plus every host with a probe URL, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let all: BTreeSet<String> = self
            .registry
            .hosts()
            .map(str::to_string)
            .chain(self.probes.keys().cloned())
            .collect();
        all.into_iter().collect()
    }

    pub async fn check(&self, host_id: &str) -> HealthCheckResult {
        let started = Instant::now();
        let (success, message) = self.run_check(host_id).await;
        if success {
            tracing::info!(host = host_id, %message, "health check passed");
        } else {
            tracing::warn!(host = host_id, %message, "health check failed");
        }
        HealthCheckResult {
            host_id: host_id.to_string(),
            success,
            message,
            timestamp: now_unix(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_check(&self, host_id: &str) -> (bool, String) {
        let Some(probe_url) = self.probes.get(host_id) else {
            return (false, "no probe URL configured".to_string());
        };
        let resolver = self
            .registry
            .get(host_id)
            .unwrap_or_else(|| self.registry.resolver_for(probe_url));
        let host = self.host_settings.get(host_id).cloned().unwrap_or_default();

        let binding = match &self.binder {
            Some(binder) if host.needs_proxy_binding(resolver.as_ref()) && !binder.pool().is_empty() => {
                match binder.acquire().await {
                    Ok(b) => Some(Arc::new(b)),
                    Err(e) => return (false, format!("no proxy: {e}")),
                }
            }
            _ => None,
        };
        let client = TaskClient::new(Arc::clone(&self.transport), binding);

        match resolver.resolve(probe_url, &client).await {
            Ok(link) => {
                let size = link
                    .size_bytes
                    .map_or_else(|| "size unknown".to_string(), |n| format!("{n} bytes"));
                (true, format!("resolved {} ({size})", link.filename))
            }
            Err(e) => (false, e.to_string()),
        }
    }

    /// Check every host concurrently. Keyed by host id.
    pub async fn check_all(&self) -> BTreeMap<String, HealthCheckResult> {
        let mut set = JoinSet::new();
        for host in self.hosts() {
            let checker = self.clone();
            set.spawn(async move { checker.check(&host).await });
        }
        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.host_id.clone(), result);
                }
                Err(e) => tracing::error!(error = %e, "health check task failed"),
            }
        }
        results
    }
}
