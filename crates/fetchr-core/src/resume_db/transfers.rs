use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::{Path, PathBuf};

use super::db::{unix_timestamp, ResumeDb};
use crate::resolver::ResolvedLink;
use crate::segmenter::{SegmentRecord, TransferState};

/// Stable task identity: hex SHA-256 of the share URL and destination directory.
pub fn task_id(share_url: &str, dest_dir: &Path) -> String {
    let mut h = Sha256::new();
    h.update(share_url.as_bytes());
    h.update([0u8]);
    h.update(dest_dir.to_string_lossy().as_bytes());
    hex::encode(h.finalize())
}

/// One resumable transfer, as listed by `fetchr status`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TransferSummary {
    pub task_id: String,
    pub share_url: String,
    pub dest_dir: PathBuf,
    pub filename: String,
    pub total_size: Option<u64>,
    pub bytes_done: u64,
    pub segments_done: usize,
    pub segment_count: usize,
    pub updated_at: i64,
}

fn state_from_row(row: &SqliteRow) -> Result<TransferState> {
    let task_id: String = row.get("task_id");
    let link: ResolvedLink = serde_json::from_str(row.get::<&str, _>("link_json"))
        .with_context(|| format!("decode link of transfer {task_id}"))?;
    let segments: Vec<SegmentRecord> = serde_json::from_str(row.get::<&str, _>("segments_json"))
        .with_context(|| format!("decode segments of transfer {task_id}"))?;
    let total_size: Option<i64> = row.get("total_size");
    let ranged: i64 = row.get("ranged");
    Ok(TransferState {
        share_url: row.get("share_url"),
        dest_dir: PathBuf::from(row.get::<String, _>("dest_dir")),
        link,
        total_size: total_size.map(|n| n as u64),
        ranged: ranged != 0,
        segments,
        task_id,
    })
}

impl ResumeDb {
    /// Insert or replace the stored state for `state.task_id`.
    pub async fn save_transfer(&self, state: &TransferState) -> Result<()> {
        let now = unix_timestamp();
        let link_json = serde_json::to_string(&state.link)?;
        let segments_json = serde_json::to_string(&state.segments)?;
        sqlx::query(
            r#"
            INSERT INTO transfers (
                task_id, share_url, dest_dir, link_json, total_size,
                ranged, segments_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(task_id) DO UPDATE SET
                share_url = excluded.share_url,
                dest_dir = excluded.dest_dir,
                link_json = excluded.link_json,
                total_size = excluded.total_size,
                ranged = excluded.ranged,
                segments_json = excluded.segments_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.task_id)
        .bind(&state.share_url)
        .bind(state.dest_dir.to_string_lossy().into_owned())
        .bind(link_json)
        .bind(state.total_size.map(|n| n as i64))
        .bind(state.ranged as i64)
        .bind(segments_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_transfer(&self, task_id: &str) -> Result<Option<TransferState>> {
        let row = sqlx::query("SELECT * FROM transfers WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    /// Returns whether a row was removed.
    pub async fn delete_transfer(&self, task_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM transfers WHERE task_id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Every stored transfer, most recently updated first.
    pub async fn list_transfers(&self) -> Result<Vec<TransferSummary>> {
        let rows = sqlx::query("SELECT * FROM transfers ORDER BY updated_at DESC, task_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let state = state_from_row(row)?;
                Ok(TransferSummary {
                    bytes_done: state.bytes_done(),
                    segments_done: state.segments_done(),
                    segment_count: state.segments.len(),
                    filename: state.link.filename.clone(),
                    total_size: state.total_size,
                    updated_at: row.get("updated_at"),
                    task_id: state.task_id,
                    share_url: state.share_url,
                    dest_dir: state.dest_dir,
                })
            })
            .collect()
    }
}
