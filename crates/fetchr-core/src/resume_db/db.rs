use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// sqlite:// URI for a path; characters the URI parser treats specially are escaped.
fn sqlite_uri(path: &Path) -> String {
    let mut uri = String::from("sqlite://");
    for c in path.to_string_lossy().chars() {
        match c {
            '%' => uri.push_str("%25"),
            ' ' => uri.push_str("%20"),
            '#' => uri.push_str("%23"),
            '?' => uri.push_str("%3F"),
            '&' => uri.push_str("%26"),
            c => uri.push(c),
        }
    }
    uri.push_str("?mode=rwc");
    uri
}

/// Handle to the transfer-state database.
#[derive(Clone)]
pub struct ResumeDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl ResumeDb {
    /// `~/.local/state/fetchr/transfers.db`.
    pub fn default_path() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchr")?;
        Ok(xdg_dirs.get_state_home().join("fetchr").join("transfers.db"))
    }

    pub async fn open_default() -> Result<Self> {
        Self::open_at(Self::default_path()?).await
    }

    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&sqlite_uri(path))
            .await
            .with_context(|| format!("open transfer db {}", path.display()))?;
        let db = ResumeDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // link and segments are JSON: their shape follows the Rust types and
        // is only ever read back by this crate.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                task_id TEXT PRIMARY KEY NOT NULL,
                share_url TEXT NOT NULL,
                dest_dir TEXT NOT NULL,
                link_json TEXT NOT NULL,
                total_size INTEGER,
                ranged INTEGER NOT NULL,
                segments_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
pub(crate) async fn open_memory() -> Result<ResumeDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = ResumeDb { pool };
    db.migrate().await?;
    Ok(db)
}
