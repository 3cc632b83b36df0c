//! `fetchr get <URL>...` – resolve and download share URLs concurrently.

use anyhow::{bail, Result};
use fetchr_core::config::FetchrConfig;
use fetchr_core::control::control_socket_path;
use fetchr_core::downloader::{Downloader, TaskOutcome, TaskReport};
use fetchr_core::engine::{Phase, ProgressReporter, ProgressStats};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// `1536` -> `1.5 KiB`.
pub fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn progress_line(stats: &ProgressStats) -> String {
    let id: String = stats.task_id.chars().take(12).collect();
    let size = match (stats.total_bytes, stats.fraction()) {
        (Some(total), Some(f)) => format!(
            "{} / {} ({:.1}%)",
            format_bytes(stats.bytes_done),
            format_bytes(total),
            f * 100.0
        ),
        _ => format!("{} / ?", format_bytes(stats.bytes_done)),
    };
    let eta = stats
        .eta_secs()
        .map(|s| format!("{s:.0}s"))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "  {id}  {:<12} {size}  {}/s  ETA {eta}  [{}/{} segments]",
        format!("{:?}", stats.phase).to_lowercase(),
        format_bytes(stats.bytes_per_sec() as u64),
        stats.segments_done,
        stats.segment_count
    )
}

fn print_report(report: &TaskReport) {
    match &report.outcome {
        TaskOutcome::Completed { path, bytes } => {
            println!("done    {} ({})", path.display(), format_bytes(*bytes));
        }
        TaskOutcome::Failed {
            kind,
            message,
            last_transient,
        } => {
            println!("failed  {} [{kind}] {message}", report.share_url);
            if let Some(last) = last_transient {
                println!("        last transient error: {last}");
            }
        }
    }
}

pub async fn run_get(cfg: FetchrConfig, urls: &[String], dest: &Path) -> Result<()> {
    let downloader = Downloader::from_config(cfg).await?;
    let control = Arc::clone(downloader.control());

    let listener = match control_socket_path()
        .and_then(|path| control_socket::spawn_control_listener(Arc::clone(&control), &path))
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("control socket unavailable: {:#}", e);
            None
        }
    };

    // Ctrl-C stops every task; progress is kept for the next run.
    let interrupt = {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, stopping tasks");
                control.abort_all();
            }
        })
    };

    let (reporter, mut progress_rx) = ProgressReporter::channel(64, PROGRESS_INTERVAL);
    let printer = tokio::spawn(async move {
        while let Some(stats) = progress_rx.recv().await {
            if stats.phase != Phase::Failed {
                println!("{}", progress_line(&stats));
            }
        }
    });

    let reports = downloader.download_all(urls, dest, Some(reporter)).await;
    let _ = printer.await;
    interrupt.abort();
    if let Some(handle) = listener {
        handle.abort();
    }
    if let Ok(path) = control_socket_path() {
        let _ = std::fs::remove_file(path);
    }

    for report in &reports {
        print_report(report);
    }
    let failed = reports.iter().filter(|r| !r.outcome.is_completed()).count();
    if failed > 0 {
        bail!("{failed} of {} downloads failed", reports.len());
    }
    Ok(())
}
