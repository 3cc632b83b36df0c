//! CLI for the fetchr share-link downloader.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchr_core::config;
use fetchr_core::resume_db::ResumeDb;
use std::path::PathBuf;

use commands::{run_cancel, run_forget, run_get, run_health, run_status};

/// Top-level CLI for fetchr.
#[derive(Debug, Parser)]
#[command(name = "fetchr")]
#[command(about = "fetchr: resolve file-host share links and download them", long_about = None)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG still takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Resolve and download one or more share URLs.
    Get {
        /// Share page or direct URLs.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Destination directory (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Run up to N tasks at once (default: max_concurrent_tasks from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Resolve each host's probe URL and report whether it still works.
    Health {
        /// Check only this host.
        host: Option<String>,
        /// Print a JSON object keyed by host instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List persisted (resumable) transfers.
    Status,

    /// Drop a persisted transfer so the next `get` starts over.
    Forget {
        /// Task id as shown by `status`.
        task_id: String,
        /// Also delete the partial download.
        #[arg(long)]
        delete_files: bool,
    },

    /// Ask a running `fetchr get` to stop one task; its progress is kept.
    Cancel {
        /// Task id as shown by `status`.
        task_id: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Get { urls, dir, jobs } => {
                if let Some(jobs) = jobs {
                    cfg.max_concurrent_tasks = jobs.max(1);
                }
                let dest = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                run_get(cfg, &urls, &dest).await?;
            }
            CliCommand::Health { host, json } => run_health(&cfg, host.as_deref(), json).await?,
            CliCommand::Status => {
                let db = ResumeDb::open_default().await?;
                run_status(&db).await?;
            }
            CliCommand::Forget {
                task_id,
                delete_files,
            } => {
                let db = ResumeDb::open_default().await?;
                run_forget(&db, &task_id, delete_files).await?;
            }
            CliCommand::Cancel { task_id } => run_cancel(&task_id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
