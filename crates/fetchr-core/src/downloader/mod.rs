//! Orchestrator: share URL → resolver → proxy binding → transfer engine.
//!
//! Each task holds a global task slot and a per-host slot for its whole
//! life, and (for hosts that need it) one proxy binding that every request
//! of the task goes through. Tasks never share state beyond those limits,
//! so one task failing leaves its siblings running.

mod report;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::config::{FetchrConfig, HostConfig};
use crate::control::{CancelToken, TaskControl};
use crate::engine::{
    GlobalConnectionBudget, ProgressReporter, TransferEngine, TransferJob, TransferSettings,
};
use crate::http::{CurlTransport, HttpTransport, TaskClient};
use crate::proxy::{ProxyAffinityBinder, ProxyBinding, ProxyPool};
use crate::resolver::{ResolveError, ResolvedLink, Resolver, ResolverRegistry};
use crate::resume_db::{task_id, ResumeDb};
use crate::retry::run_with_retry;
use crate::url_model;

pub use report::{FailureKind, TaskOutcome, TaskReport};

#[derive(Clone)]
pub struct Downloader {
    cfg: Arc<FetchrConfig>,
    registry: ResolverRegistry,
    binder: Option<ProxyAffinityBinder>,
    transport: Arc<dyn HttpTransport>,
    engine: TransferEngine,
    task_slots: Arc<Semaphore>,
    host_slots: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    control: Arc<TaskControl>,
}

impl Downloader {
    pub fn new(
        cfg: FetchrConfig,
        registry: ResolverRegistry,
        binder: Option<ProxyAffinityBinder>,
        transport: Arc<dyn HttpTransport>,
        db: ResumeDb,
    ) -> Self {
        let budget = Arc::new(GlobalConnectionBudget::new(cfg.max_total_connections));
        Self {
            task_slots: Arc::new(Semaphore::new(cfg.max_concurrent_tasks.max(1))),
            cfg: Arc::new(cfg),
            registry,
            binder,
            transport,
            engine: TransferEngine::new(db, budget),
            host_slots: Arc::new(Mutex::new(HashMap::new())),
            control: Arc::new(TaskControl::new()),
        }
    }

    /// Production wiring: configured resolvers, the proxy list (if any), curl,
    /// and the default state database.
    pub async fn from_config(cfg: FetchrConfig) -> Result<Self> {
        let registry = ResolverRegistry::from_config(&cfg)?;
        let proxies_path = cfg.resolved_proxies_path()?;
        let pool = ProxyPool::load_or_empty(&proxies_path)
            .with_context(|| format!("load proxy list {}", proxies_path.display()))?;
        tracing::info!(proxies = pool.len(), path = %proxies_path.display(), "proxy pool loaded");
        let binder = (!pool.is_empty()).then(|| ProxyAffinityBinder::from_config(pool, &cfg));
        let db = ResumeDb::open_default().await?;
        Ok(Self::new(
            cfg,
            registry,
            binder,
            Arc::new(CurlTransport::new()),
            db,
        ))
    }

    pub fn config(&self) -> &FetchrConfig {
        &self.cfg
    }

    pub fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    pub fn binder(&self) -> Option<&ProxyAffinityBinder> {
        self.binder.as_ref()
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    fn host_slots(&self, host_id: &str, host: &HostConfig) -> Arc<Semaphore> {
        let mut slots = self.host_slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(host_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(host.max_concurrent.max(1)))),
        )
    }

    /// Resolve and transfer one share URL into `dest_dir`.
    pub async fn download(
        &self,
        share_url: &str,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
    ) -> TaskReport {
        let task_id = task_id(share_url, dest_dir);
        let token = self.control.register(&task_id);
        let outcome = self
            .run_task(share_url, dest_dir, &task_id, &token, progress)
            .await;
        self.control.unregister(&task_id);
        match &outcome {
            TaskOutcome::Completed { path, bytes } => {
                tracing::info!(task_id = %task_id, url = share_url, path = %path.display(), bytes, "task complete")
            }
            TaskOutcome::Failed { kind, message, .. } => {
                tracing::warn!(task_id = %task_id, url = share_url, %kind, %message, "task failed")
            }
        }
        TaskReport {
            share_url: share_url.to_string(),
            task_id,
            outcome,
        }
    }

    /// Run many share URLs side by side. Reports come back in input order;
    /// one task's failure never stops the others.
    pub async fn download_all(
        &self,
        share_urls: &[String],
        dest_dir: &Path,
        progress: Option<ProgressReporter>,
    ) -> Vec<TaskReport> {
        let mut set = JoinSet::new();
        for (i, url) in share_urls.iter().enumerate() {
            let this = self.clone();
            let url = url.clone();
            let dest = dest_dir.to_path_buf();
            let progress = progress.clone();
            set.spawn(async move { (i, this.download(&url, &dest, progress.as_ref()).await) });
        }
        let mut reports: Vec<Option<TaskReport>> = vec![None; share_urls.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, report)) => reports[i] = Some(report),
                Err(e) => tracing::error!(error = %e, "download task failed to join"),
            }
        }
        reports
            .into_iter()
            .zip(share_urls)
            .map(|(report, url)| {
                report.unwrap_or_else(|| TaskReport {
                    share_url: url.clone(),
                    task_id: task_id(url, dest_dir),
                    outcome: TaskOutcome::failed(FailureKind::Permanent, "task panicked"),
                })
            })
            .collect()
    }

    async fn run_task(
        &self,
        share_url: &str,
        dest_dir: &Path,
        task_id: &str,
        token: &CancelToken,
        progress: Option<&ProgressReporter>,
    ) -> TaskOutcome {
        let host_id = url_model::host_id(share_url).unwrap_or_default();
        let host = self.cfg.host(&host_id);
        let host_slots = self.host_slots(&host_id, &host);

        let slots = tokio::select! {
            biased;
            _ = token.cancelled() => return TaskOutcome::failed(FailureKind::Cancelled, "cancelled"),
            slots = acquire_slots(&self.task_slots, &host_slots) => slots,
        };
        let Some(_slots) = slots else {
            return TaskOutcome::failed(FailureKind::Permanent, "downloader is shutting down");
        };

        let resolver = self.registry.resolver_for(share_url);
        let binding = match self.bind(resolver.as_ref(), &host, token).await {
            Ok(binding) => binding,
            Err(outcome) => return outcome,
        };
        let client = TaskClient::new(Arc::clone(&self.transport), binding);
        tracing::info!(
            task_id,
            url = share_url,
            resolver = resolver.name(),
            proxy = ?client.proxy().map(|p| p.as_str()),
            "task started"
        );

        let link = match self
            .resolve(resolver.as_ref(), share_url, &host_id, &client, token)
            .await
        {
            Ok(link) => link,
            Err(outcome) => return outcome,
        };

        let settings = TransferSettings::for_host(&self.cfg, &host);
        let job = TransferJob {
            task_id,
            share_url,
            dest_dir,
            link: &link,
            client: &client,
            settings: &settings,
            cancel: Some(token),
            progress,
        };
        match self.engine.run(job).await {
            Ok(done) => TaskOutcome::Completed {
                path: done.path,
                bytes: done.bytes,
            },
            Err(e) => TaskOutcome::from_transfer(&e),
        }
    }

    /// One binding per task when the host needs affinity and there is a pool;
    /// otherwise the task goes direct.
    async fn bind(
        &self,
        resolver: &dyn Resolver,
        host: &HostConfig,
        token: &CancelToken,
    ) -> Result<Option<Arc<ProxyBinding>>, TaskOutcome> {
        let Some(binder) = &self.binder else {
            return Ok(None);
        };
        if !host.needs_proxy_binding(resolver) {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TaskOutcome::failed(FailureKind::Cancelled, "cancelled")),
            bound = binder.acquire() => bound
                .map(|b| Some(Arc::new(b)))
                .map_err(|e| TaskOutcome::failed(FailureKind::Proxy, e.to_string())),
        }
    }

    /// Resolve under the host's retry budget.
    async fn resolve(
        &self,
        resolver: &dyn Resolver,
        share_url: &str,
        host_id: &str,
        client: &TaskClient,
        token: &CancelToken,
    ) -> Result<ResolvedLink, TaskOutcome> {
        let policy = self.cfg.retry_policy_for(host_id);
        let last_transient: Mutex<Option<String>> = Mutex::new(None);
        let attempts = run_with_retry(
            &policy,
            ResolveError::retry_kind,
            |attempt| {
                let last_transient = &last_transient;
                async move {
                    tracing::debug!(url = share_url, attempt, "resolving");
                    let result = resolver.resolve(share_url, client).await;
                    if let Err(e) = &result {
                        if e.retry_kind().is_transient() {
                            *last_transient.lock().unwrap_or_else(|p| p.into_inner()) =
                                Some(e.to_string());
                        }
                    }
                    result
                }
            },
        );
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(TaskOutcome::failed(FailureKind::Cancelled, "cancelled"))
            }
            r = attempts => r,
        };
        match result {
            Ok(link) => {
                tracing::debug!(
                    url = share_url,
                    attempts = link.attempts,
                    download_url = %link.value.download_url,
                    size = ?link.value.size_bytes,
                    "resolved"
                );
                Ok(link.value)
            }
            Err(failed) => {
                let last = last_transient
                    .into_inner()
                    .unwrap_or_else(|p| p.into_inner());
                Err(TaskOutcome::from_resolve(&failed.value, last))
            }
        }
    }
}

/// Host slot first, then a global slot, so tasks queued behind a busy host
/// never sit on global slots other hosts could use. `None` once a semaphore
/// is closed.
async fn acquire_slots(
    tasks: &Arc<Semaphore>,
    host: &Arc<Semaphore>,
) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
    let host = Arc::clone(host).acquire_owned().await.ok()?;
    let task = Arc::clone(tasks).acquire_owned().await.ok()?;
    Some((host, task))
}

#[cfg(test)]
mod tests;
