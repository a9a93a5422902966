//! Pre-write database backup.
//!
//! Before `sync` writes anything, the database is copied next to itself as
//! `<stem>.backup_before_sync_<YYYYmmdd_HHMMSS><ext>`. The copy is taken with
//! `VACUUM INTO` so pages still sitting in the WAL are included.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// Backup path for `db_path` at `now`.
pub fn backup_path(db_path: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    let ext = db_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = format!(
        "{}.backup_before_sync_{}{}",
        stem,
        now.format("%Y%m%d_%H%M%S"),
        ext
    );
    db_path.with_file_name(name)
}

/// Write a consistent copy of the database behind `pool` and return its path.
pub async fn backup_database(pool: &SqlitePool, db_path: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let target = backup_path(db_path, now);
    if target.exists() {
        bail!("backup target already exists: {}", target.display());
    }

    sqlx::query("VACUUM INTO ?")
        .bind(target.to_string_lossy().into_owned())
        .execute(pool)
        .await
        .with_context(|| format!("Failed to write backup {}", target.display()))?;

    tracing::info!(path = %target.display(), "database backed up");
    Ok(target)
}
