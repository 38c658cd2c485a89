//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the tables created by
//! [`migrate`](crate::migrate). JSON-valued fields round-trip through TEXT
//! columns and timestamps through Unix milliseconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use content_guard_core::models::{
    ContentMatch, DetectionJob, JobFilter, MatchFilter, MatchReview, Modality, ProtectedContent,
    ScannedItem,
};
use content_guard_core::store::{MatchWrite, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp: {}", ms))
}

fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

fn from_json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in column {}", column))
}

fn count_opt(value: Option<u64>) -> Option<i64> {
    value.map(|v| v as i64)
}

fn protected_from_row(row: &SqliteRow) -> Result<ProtectedContent> {
    Ok(ProtectedContent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        description: row.get("description"),
        modality: row.get::<String, _>("modality").parse()?,
        text_content: row.get("text_content"),
        file_path: row.get("file_path"),
        external_url: row.get("external_url"),
        content_hash: row.get("content_hash"),
        text_fingerprint: from_json(row, "text_fingerprint")?,
        visual_fingerprint: from_json(row, "visual_fingerprint")?,
        audio_fingerprint: from_json(row, "audio_fingerprint")?,
        tags: from_json(row, "tags_json")?,
        category: row.get("category"),
        copyright_info: row.get("copyright_info"),
        is_active: row.get("is_active"),
        monitoring_enabled: row.get("monitoring_enabled"),
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<ScannedItem> {
    Ok(ScannedItem {
        id: row.get("id"),
        platform: row.get("platform"),
        platform_content_id: row.get("platform_content_id"),
        modality: row.get::<String, _>("modality").parse()?,
        title: row.get("title"),
        author: row.get("author"),
        text_content: row.get("text_content"),
        media_urls: from_json(row, "media_urls_json")?,
        content_url: row.get("content_url"),
        content_hash: row.get("content_hash"),
        published_at: from_millis_opt(row.get("published_at"))?,
        metadata: from_json(row, "metadata_json")?,
        created_at: from_millis(row.get("created_at"))?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<DetectionJob> {
    Ok(DetectionJob {
        id: row.get("id"),
        user_id: row.get("user_id"),
        scanned_item_id: row.get("scanned_item_id"),
        status: row.get::<String, _>("status").parse()?,
        modalities: from_json(row, "modalities_json")?,
        similarity_threshold: row.get("similarity_threshold"),
        started_at: from_millis_opt(row.get("started_at"))?,
        completed_at: from_millis_opt(row.get("completed_at"))?,
        error_message: row.get("error_message"),
        model_versions: from_json(row, "model_versions_json")?,
        processing_time: row.get("processing_time"),
        matches_found: row.get::<Option<i64>, _>("matches_found").map(|v| v as u64),
        high_confidence_matches: row
            .get::<Option<i64>, _>("high_confidence_matches")
            .map(|v| v as u64),
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

fn match_from_row(row: &SqliteRow) -> Result<ContentMatch> {
    Ok(ContentMatch {
        id: row.get("id"),
        detection_job_id: row.get("detection_job_id"),
        protected_content_id: row.get("protected_content_id"),
        scanned_item_id: row.get("scanned_item_id"),
        match_type: row.get::<String, _>("match_type").parse()?,
        confidence: row.get::<String, _>("confidence").parse()?,
        similarity_score: row.get("similarity_score"),
        matched_segments: from_json(row, "matched_segments_json")?,
        match_metadata: from_json(row, "match_metadata_json")?,
        is_reviewed: row.get("is_reviewed"),
        is_confirmed: row.get("is_confirmed"),
        reviewed_by: row.get("reviewed_by"),
        reviewer_notes: row.get("reviewer_notes"),
        reviewed_at: from_millis_opt(row.get("reviewed_at"))?,
        action_taken: row.get::<String, _>("action_taken").parse()?,
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_protected_content(&self, content: &ProtectedContent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO protected_content (id, user_id, title, description, modality,
                                           text_content, file_path, external_url, content_hash,
                                           text_fingerprint, visual_fingerprint, audio_fingerprint,
                                           tags_json, category, copyright_info, is_active,
                                           monitoring_enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.user_id)
        .bind(&content.title)
        .bind(&content.description)
        .bind(content.modality.as_str())
        .bind(&content.text_content)
        .bind(&content.file_path)
        .bind(&content.external_url)
        .bind(&content.content_hash)
        .bind(to_json(&content.text_fingerprint)?)
        .bind(to_json(&content.visual_fingerprint)?)
        .bind(to_json(&content.audio_fingerprint)?)
        .bind(to_json(&content.tags)?)
        .bind(&content.category)
        .bind(&content.copyright_info)
        .bind(content.is_active)
        .bind(content.monitoring_enabled)
        .bind(to_millis(&content.created_at))
        .bind(to_millis(&content.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_protected_content(&self, content: &ProtectedContent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE protected_content SET
                title = ?, description = ?, modality = ?, text_content = ?, file_path = ?,
                external_url = ?, content_hash = ?, text_fingerprint = ?,
                visual_fingerprint = ?, audio_fingerprint = ?, tags_json = ?, category = ?,
                copyright_info = ?, is_active = ?, monitoring_enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&content.title)
        .bind(&content.description)
        .bind(content.modality.as_str())
        .bind(&content.text_content)
        .bind(&content.file_path)
        .bind(&content.external_url)
        .bind(&content.content_hash)
        .bind(to_json(&content.text_fingerprint)?)
        .bind(to_json(&content.visual_fingerprint)?)
        .bind(to_json(&content.audio_fingerprint)?)
        .bind(to_json(&content.tags)?)
        .bind(&content.category)
        .bind(&content.copyright_info)
        .bind(content.is_active)
        .bind(content.monitoring_enabled)
        .bind(to_millis(&content.updated_at))
        .bind(&content.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_protected_content(&self, id: &str) -> Result<Option<ProtectedContent>> {
        let row = sqlx::query("SELECT * FROM protected_content WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(protected_from_row).transpose()
    }

    async fn list_protected_content(&self, user_id: &str) -> Result<Vec<ProtectedContent>> {
        let rows = sqlx::query(
            "SELECT * FROM protected_content WHERE user_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(protected_from_row).collect()
    }

    async fn active_catalog(
        &self,
        user_id: &str,
        modalities: &[Modality],
    ) -> Result<Vec<ProtectedContent>> {
        if modalities.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT * FROM protected_content WHERE is_active = 1 AND monitoring_enabled = 1 AND user_id = ",
        );
        qb.push_bind(user_id);
        qb.push(" AND modality IN (");
        let mut separated = qb.separated(", ");
        for m in modalities {
            separated.push_bind(m.as_str());
        }
        separated.push_unseparated(")");
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(protected_from_row).collect()
    }

    async fn insert_scanned_item(&self, item: &ScannedItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scanned_items (id, platform, platform_content_id, modality, title, author,
                                       text_content, media_urls_json, content_url, content_hash,
                                       published_at, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                platform = excluded.platform,
                platform_content_id = excluded.platform_content_id,
                modality = excluded.modality,
                title = excluded.title,
                author = excluded.author,
                text_content = excluded.text_content,
                media_urls_json = excluded.media_urls_json,
                content_url = excluded.content_url,
                content_hash = excluded.content_hash,
                published_at = excluded.published_at,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&item.id)
        .bind(&item.platform)
        .bind(&item.platform_content_id)
        .bind(item.modality.as_str())
        .bind(&item.title)
        .bind(&item.author)
        .bind(&item.text_content)
        .bind(to_json(&item.media_urls)?)
        .bind(&item.content_url)
        .bind(&item.content_hash)
        .bind(item.published_at.as_ref().map(to_millis))
        .bind(to_json(&item.metadata)?)
        .bind(to_millis(&item.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_scanned_item(&self, id: &str) -> Result<Option<ScannedItem>> {
        let row = sqlx::query("SELECT * FROM scanned_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_job(&self, job: &DetectionJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO detection_jobs (id, user_id, scanned_item_id, status, modalities_json,
                                        similarity_threshold, started_at, completed_at,
                                        error_message, model_versions_json, processing_time,
                                        matches_found, high_confidence_matches,
                                        created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.scanned_item_id)
        .bind(job.status.as_str())
        .bind(to_json(&job.modalities)?)
        .bind(job.similarity_threshold)
        .bind(job.started_at.as_ref().map(to_millis))
        .bind(job.completed_at.as_ref().map(to_millis))
        .bind(&job.error_message)
        .bind(to_json(&job.model_versions)?)
        .bind(job.processing_time)
        .bind(count_opt(job.matches_found))
        .bind(count_opt(job.high_confidence_matches))
        .bind(to_millis(&job.created_at))
        .bind(to_millis(&job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_job(&self, job: &DetectionJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE detection_jobs SET
                status = ?, modalities_json = ?, similarity_threshold = ?, started_at = ?,
                completed_at = ?, error_message = ?, model_versions_json = ?,
                processing_time = ?, matches_found = ?, high_confidence_matches = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(to_json(&job.modalities)?)
        .bind(job.similarity_threshold)
        .bind(job.started_at.as_ref().map(to_millis))
        .bind(job.completed_at.as_ref().map(to_millis))
        .bind(&job.error_message)
        .bind(to_json(&job.model_versions)?)
        .bind(job.processing_time)
        .bind(count_opt(job.matches_found))
        .bind(count_opt(job.high_confidence_matches))
        .bind(to_millis(&job.updated_at))
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_job(&self, job: &DetectionJob, stale_before: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE detection_jobs SET
                status = 'processing', started_at = ?, model_versions_json = ?, updated_at = ?
            WHERE id = ?
              AND (status = 'pending'
                   OR (status = 'processing' AND (started_at IS NULL OR started_at < ?)))
            "#,
        )
        .bind(job.started_at.as_ref().map(to_millis))
        .bind(to_json(&job.model_versions)?)
        .bind(to_millis(&job.updated_at))
        .bind(&job.id)
        .bind(to_millis(&stale_before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE detection_jobs SET
                status = 'failed', error_message = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(message)
        .bind(to_millis(&at))
        .bind(to_millis(&at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_job(&self, id: &str) -> Result<Option<DetectionJob>> {
        let row = sqlx::query("SELECT * FROM detection_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<DetectionJob>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM detection_jobs WHERE 1 = 1");
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn upsert_match(&self, m: &ContentMatch) -> Result<MatchWrite> {
        // One autocommit statement: no read-then-write window, and the
        // reviewed guard yields no row at all.
        let written: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO content_matches (id, detection_job_id, protected_content_id,
                                         scanned_item_id, match_type, confidence,
                                         similarity_score, matched_segments_json,
                                         match_metadata_json, is_reviewed, is_confirmed,
                                         reviewed_by, reviewer_notes, reviewed_at,
                                         action_taken, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(protected_content_id, scanned_item_id) DO UPDATE SET
                detection_job_id = excluded.detection_job_id,
                match_type = excluded.match_type,
                confidence = excluded.confidence,
                similarity_score = excluded.similarity_score,
                matched_segments_json = excluded.matched_segments_json,
                match_metadata_json = excluded.match_metadata_json,
                updated_at = excluded.updated_at
            WHERE content_matches.is_reviewed = 0
            RETURNING id
            "#,
        )
        .bind(&m.id)
        .bind(&m.detection_job_id)
        .bind(&m.protected_content_id)
        .bind(&m.scanned_item_id)
        .bind(m.match_type.as_str())
        .bind(m.confidence.as_str())
        .bind(m.similarity_score)
        .bind(to_json(&m.matched_segments)?)
        .bind(to_json(&m.match_metadata)?)
        .bind(m.is_reviewed)
        .bind(m.is_confirmed)
        .bind(&m.reviewed_by)
        .bind(&m.reviewer_notes)
        .bind(m.reviewed_at.as_ref().map(to_millis))
        .bind(m.action_taken.as_str())
        .bind(to_millis(&m.created_at))
        .bind(to_millis(&m.updated_at))
        .fetch_optional(&self.pool)
        .await?;

        Ok(match written {
            None => MatchWrite::Skipped,
            Some(id) if id == m.id => MatchWrite::Created,
            Some(_) => MatchWrite::Updated,
        })
    }

    async fn get_match(&self, id: &str) -> Result<Option<ContentMatch>> {
        let row = sqlx::query("SELECT * FROM content_matches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(match_from_row).transpose()
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<ContentMatch>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT m.* FROM content_matches m JOIN protected_content p ON p.id = m.protected_content_id WHERE 1 = 1",
        );
        if let Some(job_id) = &filter.job_id {
            qb.push(" AND m.detection_job_id = ").push_bind(job_id.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND p.user_id = ").push_bind(user_id.as_str());
        }
        if let Some(reviewed) = filter.reviewed {
            qb.push(" AND m.is_reviewed = ").push_bind(reviewed);
        }
        qb.push(" ORDER BY m.similarity_score DESC, m.id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(match_from_row).collect()
    }

    async fn record_review(&self, match_id: &str, review: &MatchReview) -> Result<bool> {
        let reviewed_at = to_millis(&review.reviewed_at);
        let result = sqlx::query(
            r#"
            UPDATE content_matches SET
                is_reviewed = 1, is_confirmed = ?, reviewed_by = ?, reviewer_notes = ?,
                reviewed_at = ?, action_taken = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(review.confirmed)
        .bind(&review.reviewer)
        .bind(&review.notes)
        .bind(reviewed_at)
        .bind(review.action.as_str())
        .bind(reviewed_at)
        .bind(match_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
