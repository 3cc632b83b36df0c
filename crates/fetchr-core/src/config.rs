use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::resolver::Resolver;
use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Default maximum number of attempts per request (including the first).
    /// Hosts override this with their own `max_retries`.
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.5,
            max_delay_secs: 10,
        }
    }
}

impl RetryConfig {
    /// Build a policy with this backoff and the given attempt budget.
    pub fn policy_with_attempts(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// How the proxy binder picks a pool entry for a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxySelection {
    #[default]
    Random,
    RoundRobin,
}

/// External download accelerator (aria2c-compatible command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Program to execute.
    pub program: String,
    /// Connections / splits passed to the accelerator.
    pub connections: u32,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            program: "aria2c".to_string(),
            connections: 5,
        }
    }
}

/// Per-host transport limits. Read as already-validated values by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Resolver variant for this host (`exload`, `passthrough`).
    #[serde(default = "default_resolver")]
    pub resolver: String,
    /// Concurrent segment connections for one transfer.
    pub max_connections: usize,
    /// Concurrent tasks against this host.
    pub max_concurrent: usize,
    /// Hold one proxy binding per task for resolve + every transfer request.
    #[serde(default)]
    pub use_proxy_affinity: bool,
    /// Attempt budget for requests against this host.
    pub max_retries: u32,
    /// Delegate transfers to the external accelerator.
    #[serde(default)]
    pub accelerator_enabled: bool,
    /// Countdown between share-page fetch and form submit (resolver default if unset).
    #[serde(default)]
    pub countdown_secs: Option<u64>,
}

impl HostConfig {
    /// A task against this host holds one proxy binding end to end when the
    /// host entry asks for it or its resolver cannot work without one.
    pub fn needs_proxy_binding(&self, resolver: &dyn Resolver) -> bool {
        self.use_proxy_affinity || resolver.requires_affinity()
    }
}

fn default_resolver() -> String {
    "passthrough".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            resolver: default_resolver(),
            max_connections: 5,
            max_concurrent: 1,
            use_proxy_affinity: false,
            max_retries: 5,
            accelerator_enabled: false,
            countdown_secs: None,
        }
    }
}

/// Health probe target for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbeConfig {
    pub probe_url: String,
}

/// Global configuration loaded from `~/.config/fetchr/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchrConfig {
    /// Maximum number of tasks (resolve + transfer) in flight.
    pub max_concurrent_tasks: usize,
    /// Maximum total concurrent segment connections across all tasks.
    pub max_total_connections: usize,
    /// Target segment size in bytes.
    pub segment_size_bytes: u64,
    /// Upper bound on segments per transfer.
    pub max_segments: usize,
    /// Proxy list file; defaults to `proxies.txt` next to the config file.
    #[serde(default)]
    pub proxies_path: Option<PathBuf>,
    #[serde(default)]
    pub proxy_selection: ProxySelection,
    /// Cap on concurrently active bindings per proxy entry.
    pub max_bindings_per_proxy: usize,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub accelerator: Option<AcceleratorConfig>,
    /// Per-host settings keyed by host id (lower-case, no `www.`).
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
    /// Health probe URLs keyed by host id.
    #[serde(default)]
    pub health: BTreeMap<String, HealthProbeConfig>,
}

impl Default for FetchrConfig {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "ex-load.com".to_string(),
            HostConfig {
                resolver: "exload".to_string(),
                max_connections: 1,
                max_concurrent: 2,
                use_proxy_affinity: true,
                max_retries: 5,
                accelerator_enabled: false,
                countdown_secs: None,
            },
        );
        Self {
            max_concurrent_tasks: 20,
            max_total_connections: 64,
            segment_size_bytes: 8 * 1024 * 1024,
            max_segments: 16,
            proxies_path: None,
            proxy_selection: ProxySelection::Random,
            max_bindings_per_proxy: 1,
            retry: None,
            accelerator: None,
            hosts,
            health: BTreeMap::new(),
        }
    }
}

impl FetchrConfig {
    /// Host settings for `host_id`, or the conservative default entry.
    pub fn host(&self, host_id: &str) -> HostConfig {
        self.hosts.get(host_id).cloned().unwrap_or_default()
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Retry policy for a host, using the host's attempt budget.
    pub fn retry_policy_for(&self, host_id: &str) -> RetryPolicy {
        self.retry_config()
            .policy_with_attempts(self.host(host_id).max_retries)
    }

    /// Proxy list path: configured value or `proxies.txt` beside the config file.
    pub fn resolved_proxies_path(&self) -> Result<PathBuf> {
        match &self.proxies_path {
            Some(p) => Ok(p.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchr")?;
                Ok(xdg_dirs.get_config_home().join("fetchr").join("proxies.txt"))
            }
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchr")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchrConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchrConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg: FetchrConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
