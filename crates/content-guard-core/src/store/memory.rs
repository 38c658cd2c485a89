//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. All match writes take the
//! same write lock, which serialises creation per (protected content,
//! scanned item) pair.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ContentMatch, DetectionJob, JobFilter, JobStatus, MatchFilter, MatchReview, Modality,
    ProtectedContent, ScannedItem,
};

use super::{MatchWrite, Store};

/// In-memory store.
pub struct InMemoryStore {
    catalog: RwLock<HashMap<String, ProtectedContent>>,
    items: RwLock<HashMap<String, ScannedItem>>,
    jobs: RwLock<HashMap<String, DetectionJob>>,
    matches: RwLock<HashMap<String, ContentMatch>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            matches: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_protected_content(&self, content: &ProtectedContent) -> Result<()> {
        let mut catalog = write(&self.catalog)?;
        if catalog.contains_key(&content.id) {
            return Err(anyhow!("protected content {} already exists", content.id));
        }
        catalog.insert(content.id.clone(), content.clone());
        Ok(())
    }

    async fn update_protected_content(&self, content: &ProtectedContent) -> Result<bool> {
        let mut catalog = write(&self.catalog)?;
        match catalog.get_mut(&content.id) {
            Some(existing) => {
                *existing = content.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_protected_content(&self, id: &str) -> Result<Option<ProtectedContent>> {
        Ok(read(&self.catalog)?.get(id).cloned())
    }

    async fn list_protected_content(&self, user_id: &str) -> Result<Vec<ProtectedContent>> {
        let mut entries: Vec<ProtectedContent> = read(&self.catalog)?
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn active_catalog(
        &self,
        user_id: &str,
        modalities: &[Modality],
    ) -> Result<Vec<ProtectedContent>> {
        let mut entries: Vec<ProtectedContent> = read(&self.catalog)?
            .values()
            .filter(|c| {
                c.user_id == user_id && c.is_monitored() && modalities.contains(&c.modality)
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn insert_scanned_item(&self, item: &ScannedItem) -> Result<()> {
        write(&self.items)?.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_scanned_item(&self, id: &str) -> Result<Option<ScannedItem>> {
        Ok(read(&self.items)?.get(id).cloned())
    }

    async fn insert_job(&self, job: &DetectionJob) -> Result<()> {
        let mut jobs = write(&self.jobs)?;
        if jobs.contains_key(&job.id) {
            return Err(anyhow!("detection job {} already exists", job.id));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &DetectionJob) -> Result<bool> {
        let mut jobs = write(&self.jobs)?;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim_job(&self, job: &DetectionJob, stale_before: DateTime<Utc>) -> Result<bool> {
        let mut jobs = write(&self.jobs)?;
        match jobs.get_mut(&job.id) {
            Some(existing)
                if existing.status == JobStatus::Pending || existing.is_stale(stale_before) =>
            {
                existing.status = JobStatus::Processing;
                existing.started_at = job.started_at;
                existing.model_versions = job.model_versions.clone();
                existing.updated_at = job.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut jobs = write(&self.jobs)?;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.error_message = Some(message.to_string());
                job.completed_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<DetectionJob>> {
        Ok(read(&self.jobs)?.get(id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<DetectionJob>> {
        let mut jobs: Vec<DetectionJob> = read(&self.jobs)?
            .values()
            .filter(|j| filter.user_id.as_ref().map_or(true, |u| &j.user_id == u))
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn upsert_match(&self, m: &ContentMatch) -> Result<MatchWrite> {
        let mut matches = write(&self.matches)?;
        let existing_id = matches
            .values()
            .find(|e| {
                e.protected_content_id == m.protected_content_id
                    && e.scanned_item_id == m.scanned_item_id
            })
            .map(|e| e.id.clone());

        match existing_id.and_then(|id| matches.get_mut(&id)) {
            Some(e) if e.is_reviewed => Ok(MatchWrite::Skipped),
            Some(e) => {
                e.detection_job_id = m.detection_job_id.clone();
                e.match_type = m.match_type;
                e.confidence = m.confidence;
                e.similarity_score = m.similarity_score;
                e.matched_segments = m.matched_segments.clone();
                e.match_metadata = m.match_metadata.clone();
                e.updated_at = m.updated_at;
                Ok(MatchWrite::Updated)
            }
            None => {
                matches.insert(m.id.clone(), m.clone());
                Ok(MatchWrite::Created)
            }
        }
    }

    async fn get_match(&self, id: &str) -> Result<Option<ContentMatch>> {
        Ok(read(&self.matches)?.get(id).cloned())
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<ContentMatch>> {
        let catalog = read(&self.catalog)?;
        let mut found: Vec<ContentMatch> = read(&self.matches)?
            .values()
            .filter(|m| {
                filter
                    .job_id
                    .as_ref()
                    .map_or(true, |j| &m.detection_job_id == j)
            })
            .filter(|m| filter.reviewed.map_or(true, |r| m.is_reviewed == r))
            .filter(|m| {
                filter.user_id.as_ref().map_or(true, |u| {
                    catalog
                        .get(&m.protected_content_id)
                        .is_some_and(|c| &c.user_id == u)
                })
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.similarity_score
                .total_cmp(&a.similarity_score)
                .then(a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn record_review(&self, match_id: &str, review: &MatchReview) -> Result<bool> {
        let mut matches = write(&self.matches)?;
        match matches.get_mut(match_id) {
            Some(m) => {
                m.is_reviewed = true;
                m.is_confirmed = Some(review.confirmed);
                m.reviewed_by = Some(review.reviewer.clone());
                m.reviewer_notes = review.notes.clone();
                m.reviewed_at = Some(review.reviewed_at);
                m.action_taken = review.action;
                m.updated_at = review.reviewed_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
