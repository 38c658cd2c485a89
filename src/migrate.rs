//! Idempotent schema migrations.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so `cguard init` can be
//! run any number of times. JSON-valued columns are TEXT; timestamps are
//! Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Protected works under monitoring
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protected_content (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            modality TEXT NOT NULL,
            text_content TEXT,
            file_path TEXT,
            external_url TEXT,
            content_hash TEXT NOT NULL,
            text_fingerprint TEXT NOT NULL DEFAULT '{}',
            visual_fingerprint TEXT NOT NULL DEFAULT '{}',
            audio_fingerprint TEXT NOT NULL DEFAULT '{}',
            tags_json TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            copyright_info TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            monitoring_enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Items observed on platforms
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scanned_items (
            id TEXT PRIMARY KEY,
            platform TEXT,
            platform_content_id TEXT,
            modality TEXT NOT NULL,
            title TEXT,
            author TEXT,
            text_content TEXT,
            media_urls_json TEXT NOT NULL DEFAULT '[]',
            content_url TEXT,
            content_hash TEXT NOT NULL DEFAULT '',
            published_at INTEGER,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detection_jobs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            scanned_item_id TEXT NOT NULL,
            status TEXT NOT NULL,
            modalities_json TEXT NOT NULL,
            similarity_threshold REAL NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            error_message TEXT,
            model_versions_json TEXT NOT NULL DEFAULT '{}',
            processing_time REAL,
            matches_found INTEGER,
            high_confidence_matches INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (scanned_item_id) REFERENCES scanned_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (protected content, scanned item) pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_matches (
            id TEXT PRIMARY KEY,
            detection_job_id TEXT NOT NULL,
            protected_content_id TEXT NOT NULL,
            scanned_item_id TEXT NOT NULL,
            match_type TEXT NOT NULL,
            confidence TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            matched_segments_json TEXT NOT NULL DEFAULT '[]',
            match_metadata_json TEXT NOT NULL DEFAULT '{}',
            is_reviewed INTEGER NOT NULL DEFAULT 0,
            is_confirmed INTEGER,
            reviewed_by TEXT,
            reviewer_notes TEXT,
            reviewed_at INTEGER,
            action_taken TEXT NOT NULL DEFAULT 'none',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(protected_content_id, scanned_item_id),
            FOREIGN KEY (detection_job_id) REFERENCES detection_jobs(id),
            FOREIGN KEY (protected_content_id) REFERENCES protected_content(id),
            FOREIGN KEY (scanned_item_id) REFERENCES scanned_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_protected_content_user ON protected_content(user_id, is_active, monitoring_enabled)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detection_jobs_status ON detection_jobs(status, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detection_jobs_user ON detection_jobs(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_matches_job ON content_matches(detection_job_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_matches_review ON content_matches(is_reviewed, confidence)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
