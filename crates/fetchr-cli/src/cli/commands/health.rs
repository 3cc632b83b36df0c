//! `fetchr health [HOST]` – resolve each host's probe URL.

use anyhow::{bail, Context, Result};
use fetchr_core::config::FetchrConfig;
use fetchr_core::health::{HealthCheckResult, HealthChecker};
use fetchr_core::http::CurlTransport;
use fetchr_core::proxy::{ProxyAffinityBinder, ProxyPool};
use fetchr_core::resolver::ResolverRegistry;
use fetchr_core::url_model;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `Ex-Load.com`, `www.ex-load.com` and `https://ex-load.com/x` all name `ex-load.com`.
fn normalize_host(arg: &str) -> String {
    url_model::host_id(arg)
        .or_else(|| url_model::host_id(&format!("https://{arg}")))
        .unwrap_or_else(|| arg.to_ascii_lowercase())
}

fn print_table(results: &BTreeMap<String, HealthCheckResult>) {
    println!("{:<24} {:<6} {:>8}  {}", "HOST", "OK", "MS", "MESSAGE");
    for r in results.values() {
        println!(
            "{:<24} {:<6} {:>8}  {}",
            r.host_id,
            if r.success { "yes" } else { "no" },
            r.elapsed_ms,
            r.message
        );
    }
}

pub async fn run_health(cfg: &FetchrConfig, host: Option<&str>, json: bool) -> Result<()> {
    let registry = ResolverRegistry::from_config(cfg)?;
    let proxies_path = cfg.resolved_proxies_path()?;
    let pool = ProxyPool::load_or_empty(&proxies_path)
        .with_context(|| format!("load proxy list {}", proxies_path.display()))?;
    let binder = (!pool.is_empty()).then(|| ProxyAffinityBinder::from_config(pool, cfg));
    let checker = HealthChecker::from_config(cfg, registry, Arc::new(CurlTransport::new()), binder);

    let results = match host {
        Some(host) => {
            let result = checker.check(&normalize_host(host)).await;
            BTreeMap::from([(result.host_id.clone(), result)])
        }
        None => checker.check_all().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No hosts configured.");
    } else {
        print_table(&results);
    }

    let failed = results.values().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} of {} host checks failed", results.len());
    }
    Ok(())
}
