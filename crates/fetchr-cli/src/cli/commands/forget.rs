//! `fetchr forget <task_id>` – drop a persisted transfer; optionally delete its
//! partial file with --delete-files.

use anyhow::{bail, Result};
use fetchr_core::resume_db::ResumeDb;
use fetchr_core::storage;

/// Accepts a full task id or a unique prefix of one.
pub async fn run_forget(db: &ResumeDb, task_id: &str, delete_files: bool) -> Result<()> {
    let matches: Vec<String> = db
        .list_transfers()
        .await?
        .into_iter()
        .map(|t| t.task_id)
        .filter(|id| id.starts_with(task_id))
        .collect();
    let id = match matches.as_slice() {
        [one] => one.clone(),
        [] => bail!("no persisted transfer matches {task_id}"),
        _ => bail!("{task_id} matches {} transfers; give more of the id", matches.len()),
    };

    if delete_files {
        if let Some(state) = db.load_transfer(&id).await? {
            let path = storage::temp_path(&state.dest_dir, &state.link.filename, &id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted partial file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
            }
        }
    }

    db.delete_transfer(&id).await?;
    println!("Forgot transfer {id}");
    Ok(())
}
