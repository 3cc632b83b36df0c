//! Disk side of a transfer.
//!
//! Bytes land in a per-task temp file next to the destination, written at
//! their own offsets so segments can complete in any order. Assembly syncs
//! the temp file and renames it to a free final name in one step, so a
//! partial file is never visible under the final name.

mod part_file;

use std::path::{Path, PathBuf};

pub use part_file::PartFile;

pub const TEMP_SUFFIX: &str = ".part";

/// Temp file for a task: `<dir>/<filename>.<task prefix>.part`. Stable across
/// restarts so a resume finds it again; the task prefix keeps two tasks with
/// the same filename apart.
pub fn temp_path(dest_dir: &Path, filename: &str, task_id: &str) -> PathBuf {
    let prefix: String = task_id.chars().take(12).collect();
    dest_dir.join(format!("{filename}.{prefix}{TEMP_SUFFIX}"))
}

/// First free path for `filename` in `dir`: `name.ext`, then `name (1).ext`,
/// `name (2).ext`, …
pub fn available_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(filename);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let ext = as_path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
