//! Database statistics overview.
//!
//! Summarizes what the entity store holds: record counts per collection and
//! a per-group breakdown of the primary collection. Used by `carryover stats`
//! to confirm a sync landed where expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-group breakdown of the primary collection.
struct GroupStats {
    group_key: Option<String>,
    count: i64,
    last_updated_ms: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Carryover — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();

    for collection in config.collections.all() {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&collection)
            .fetch_one(&pool)
            .await?;
        println!("  {:<12} {}", format!("{}:", collection), count);
    }

    let rows = sqlx::query(
        r#"
        SELECT
            json_extract(payload, ?) AS group_key,
            COUNT(*) AS cnt,
            MAX(updated_at) AS last_updated
        FROM records
        WHERE collection = ?
        GROUP BY group_key
        ORDER BY group_key
        "#,
    )
    .bind(config.layout.group_path())
    .bind(&config.collections.primary)
    .fetch_all(&pool)
    .await?;

    let groups: Vec<GroupStats> = rows
        .iter()
        .map(|row| GroupStats {
            group_key: row.get("group_key"),
            count: row.get("cnt"),
            last_updated_ms: row.get("last_updated"),
        })
        .collect();

    if !groups.is_empty() {
        println!();
        println!("  By group ({}):", config.collections.primary);
        println!("  {:<40} {:>6}   {}", "GROUP", "COUNT", "LAST UPDATE");
        println!("  {}", "-".repeat(68));

        for g in &groups {
            println!(
                "  {:<40} {:>6}   {}",
                g.group_key.as_deref().unwrap_or("(none)"),
                g.count,
                format_ts_relative(g.last_updated_ms / 1000)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
