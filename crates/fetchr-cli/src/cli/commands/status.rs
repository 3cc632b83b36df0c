//! `fetchr status` – list persisted transfers.

use anyhow::Result;
use fetchr_core::resume_db::{ResumeDb, TransferSummary};

use super::get::format_bytes;

fn progress_column(t: &TransferSummary) -> String {
    match t.total_size {
        Some(total) if total > 0 => format!(
            "{} / {} ({:.0}%)",
            format_bytes(t.bytes_done),
            format_bytes(total),
            t.bytes_done as f64 * 100.0 / total as f64
        ),
        Some(_) => "0 B".to_string(),
        None => format!("{} / ?", format_bytes(t.bytes_done)),
    }
}

pub async fn run_status(db: &ResumeDb) -> Result<()> {
    let transfers = db.list_transfers().await?;
    if transfers.is_empty() {
        println!("No resumable transfers.");
        return Ok(());
    }
    println!(
        "{:<14} {:<9} {:<28} {:<30} {}",
        "TASK", "SEGMENTS", "PROGRESS", "FILE", "URL"
    );
    for t in transfers {
        let short: String = t.task_id.chars().take(12).collect();
        println!(
            "{:<14} {:<9} {:<28} {:<30} {}",
            short,
            format!("{}/{}", t.segments_done, t.segment_count),
            progress_column(&t),
            t.dest_dir.join(&t.filename).display(),
            t.share_url
        );
    }
    Ok(())
}
