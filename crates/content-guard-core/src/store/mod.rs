//! Storage abstraction for Content Guard.
//!
//! The [`Store`] trait defines every persistence operation the catalog and
//! the detection pipeline need, so backends are pluggable (SQLite in the
//! application crate, [`memory::InMemoryStore`] for tests and embedding).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ContentMatch, DetectionJob, JobFilter, MatchFilter, MatchReview, Modality, ProtectedContent,
    ScannedItem,
};

/// What [`Store::upsert_match`] did with a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchWrite {
    /// No row existed for the pair; one was inserted.
    Created,
    /// An unreviewed row for the pair was refreshed in place.
    Updated,
    /// The pair's row is already reviewed and was left untouched.
    Skipped,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_protected_content`](Store::insert_protected_content) | Add a catalog entry |
/// | [`update_protected_content`](Store::update_protected_content) | Persist an edited entry |
/// | [`active_catalog`](Store::active_catalog) | Monitored entries of a user for given modalities |
/// | [`insert_scanned_item`](Store::insert_scanned_item) | Record an ingested item |
/// | [`insert_job`](Store::insert_job) / [`update_job`](Store::update_job) | Job persistence |
/// | [`claim_job`](Store::claim_job) | Move a job into `processing` for exactly one runner |
/// | [`mark_failed`](Store::mark_failed) | Minimal terminal write when `update_job` keeps failing |
/// | [`upsert_match`](Store::upsert_match) | Insert or refresh a match, one per pair |
/// | [`list_matches`](Store::list_matches) | Matches by job / user / review state |
/// | [`record_review`](Store::record_review) | Apply a human review |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_protected_content(&self, content: &ProtectedContent) -> Result<()>;

    /// Overwrite an existing entry. Returns `false` if the id is unknown.
    async fn update_protected_content(&self, content: &ProtectedContent) -> Result<bool>;

    async fn get_protected_content(&self, id: &str) -> Result<Option<ProtectedContent>>;

    /// All entries owned by `user_id`, oldest first.
    async fn list_protected_content(&self, user_id: &str) -> Result<Vec<ProtectedContent>>;

    /// Snapshot of the entries a job compares against: owned by `user_id`,
    /// active, monitoring enabled, and of one of `modalities`.
    async fn active_catalog(
        &self,
        user_id: &str,
        modalities: &[Modality],
    ) -> Result<Vec<ProtectedContent>>;

    /// Insert or replace a scanned item by id.
    async fn insert_scanned_item(&self, item: &ScannedItem) -> Result<()>;

    async fn get_scanned_item(&self, id: &str) -> Result<Option<ScannedItem>>;

    async fn insert_job(&self, job: &DetectionJob) -> Result<()>;

    /// Overwrite an existing job. Returns `false` if the id is unknown.
    async fn update_job(&self, job: &DetectionJob) -> Result<bool>;

    /// Atomically persist `job` entering `processing` (its status,
    /// `started_at`, model versions and `updated_at`).
    ///
    /// Succeeds only while the stored row is still `pending`, or is
    /// `processing` with a `started_at` older than `stale_before`. Returns
    /// `false` when another runner holds the job.
    async fn claim_job(&self, job: &DetectionJob, stale_before: DateTime<Utc>) -> Result<bool>;

    /// Set a `processing` job to `failed` with `message`, touching nothing
    /// else. Returns `false` if the job is unknown or not `processing`.
    async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn get_job(&self, id: &str) -> Result<Option<DetectionJob>>;

    /// Jobs matching `filter`, newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<DetectionJob>>;

    /// Insert a match, or refresh the existing row for the same
    /// (protected content, scanned item) pair unless it has been reviewed.
    async fn upsert_match(&self, m: &ContentMatch) -> Result<MatchWrite>;

    async fn get_match(&self, id: &str) -> Result<Option<ContentMatch>>;

    /// Matches satisfying `filter`, highest score first.
    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<ContentMatch>>;

    /// Apply a review. Returns `false` if the match id is unknown.
    async fn record_review(&self, match_id: &str, review: &MatchReview) -> Result<bool>;
}
