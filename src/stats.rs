//! Database statistics.
//!
//! A quick summary of what is monitored and what the pipeline has found:
//! catalog size per modality, jobs by status, matches by confidence and
//! review state. Used by `cguard stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// `(label, count)` rows of a `GROUP BY` query.
async fn grouped(pool: &SqlitePool, sql: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1)))
        .collect())
}

fn print_group(title: &str, rows: &[(String, i64)]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  {}:", title);
    for (label, count) in rows {
        println!("    {:<12} {:>8}", label, count);
    }
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let protected: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM protected_content")
        .fetch_one(&pool)
        .await?;
    let monitored: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM protected_content WHERE is_active = 1 AND monitoring_enabled = 1",
    )
    .fetch_one(&pool)
    .await?;
    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scanned_items")
        .fetch_one(&pool)
        .await?;
    let matches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_matches")
        .fetch_one(&pool)
        .await?;
    let unreviewed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM content_matches WHERE is_reviewed = 0")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Content Guard: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Protected:   {} ({} monitored)", protected, monitored);
    println!("  Scanned:     {}", items);
    println!("  Matches:     {} ({} awaiting review)", matches, unreviewed);

    print_group(
        "Catalog by modality",
        &grouped(
            &pool,
            "SELECT modality, COUNT(*) FROM protected_content GROUP BY modality ORDER BY modality",
        )
        .await?,
    );
    print_group(
        "Jobs by status",
        &grouped(
            &pool,
            "SELECT status, COUNT(*) FROM detection_jobs GROUP BY status ORDER BY status",
        )
        .await?,
    );
    print_group(
        "Matches by confidence",
        &grouped(
            &pool,
            "SELECT confidence, COUNT(*) FROM content_matches GROUP BY confidence ORDER BY confidence",
        )
        .await?,
    );
    print_group(
        "Matches by action",
        &grouped(
            &pool,
            "SELECT action_taken, COUNT(*) FROM content_matches GROUP BY action_taken ORDER BY action_taken",
        )
        .await?,
    );

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
