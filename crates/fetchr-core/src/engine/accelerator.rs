//! Delegation to an external aria2c-compatible downloader.
//!
//! The child gets the resolved URL, the task's proxy and the retry budget;
//! its exit status is the only result. No segment state is kept here.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::config::AcceleratorConfig;
use crate::proxy::ProxyIdentity;
use crate::resolver::ResolvedLink;
use crate::retry::TransferError;

/// Command line for one delegated transfer.
pub fn accelerator_args(
    link: &ResolvedLink,
    dest_dir: &Path,
    out_name: &str,
    proxy: Option<&ProxyIdentity>,
    connections: u32,
) -> Vec<String> {
    let connections = connections.max(1);
    let mut args = vec![
        link.download_url.clone(),
        "--continue=true".to_string(),
        format!("--dir={}", dest_dir.display()),
        format!("--out={out_name}"),
        format!("--split={connections}"),
        format!("--max-connection-per-server={connections}"),
        format!("--max-tries={}", link.max_retries.max(1)),
        "--auto-file-renaming=false".to_string(),
    ];
    if let Some(proxy) = proxy {
        args.push(format!("--all-proxy={}", proxy.as_str()));
    }
    for (name, value) in &link.headers {
        args.push(format!("--header={name}: {value}"));
    }
    args
}

/// Run the accelerator to completion. Returns the path it was told to write.
pub async fn run_accelerator(
    cfg: &AcceleratorConfig,
    link: &ResolvedLink,
    dest_dir: &Path,
    out_name: &str,
    proxy: Option<&ProxyIdentity>,
) -> Result<PathBuf, TransferError> {
    let args = accelerator_args(link, dest_dir, out_name, proxy, cfg.connections);
    tracing::info!(
        program = %cfg.program,
        url = %link.download_url,
        proxy = ?proxy.map(ProxyIdentity::as_str),
        "delegating transfer to accelerator"
    );
    let status = tokio::process::Command::new(&cfg.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| TransferError::Accelerator {
            status: format!("failed to start {}: {e}", cfg.program),
        })?;
    if !status.success() {
        return Err(TransferError::Accelerator {
            status: status.to_string(),
        });
    }
    Ok(dest_dir.join(out_name))
}
