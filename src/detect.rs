//! Detection Manager: runs detection jobs end to end.
//!
//! # Pipeline
//!
//! ```text
//! job (pending, or processing and stale)
//!   │ claim atomically, record model versions
//!   ▼
//! active catalog snapshot (user, monitored, requested modalities)
//!   │ per candidate: item field → fingerprint → compare
//!   ▼
//! decide(score, threshold) ──just above threshold, text?──▶ judge (retry, fallback)
//!   │
//!   ▼
//! upsert ContentMatch (one per pair) → tally
//!   │
//!   ▼
//! job (completed | failed)
//! ```
//!
//! Every error raised after the job enters `processing` is converted into a
//! `failed` job with the error text recorded. The terminal write is retried
//! and, failing that, replaced by a bare `failed` status write. Only when
//! the store refuses both does the job stay in `processing`, and another
//! run reclaims it once `stale_after` has passed.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use content_guard_core::catalog::Catalog;
use content_guard_core::compare::{Comparator, JobComparator, PlaceholderComparator};
use content_guard_core::fingerprint::Fingerprinters;
use content_guard_core::job::{DetectionReport, JobDefaults, JobSubmission, MatchTally};
use content_guard_core::judge::{self, Judge, JudgeRequest, JudgeVerdict};
use content_guard_core::models::{
    ActionTaken, ContentMatch, DetectionJob, JobStatus, Modality, ProtectedContent, ScannedItem,
};
use content_guard_core::policy::{self, BorderlineBand, MatchDecision};
use content_guard_core::store::{MatchWrite, Store};
use content_guard_core::DetectionError;

use crate::config::Config;
use crate::db;
use crate::judge::create_judge;
use crate::sqlite_store::SqliteStore;

/// Attempts at the terminal job write before falling back to `mark_failed`.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Tunables resolved once from configuration.
#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub defaults: JobDefaults,
    /// Width of the judge band above the threshold.
    pub borderline_margin: f64,
    pub judge_borderline: bool,
    pub judge_max_retries: u32,
    pub judge_backoff: Duration,
    /// Age after which a `processing` job may be reclaimed.
    pub stale_after: Duration,
    /// Pause between terminal write attempts, doubled each time.
    pub store_retry_backoff: Duration,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            defaults: JobDefaults::default(),
            borderline_margin: 0.1,
            judge_borderline: false,
            judge_max_retries: 3,
            judge_backoff: Duration::from_secs(1),
            stale_after: Duration::from_secs(900),
            store_retry_backoff: Duration::from_millis(200),
        }
    }
}

impl DetectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            defaults: config.detection.job_defaults(),
            borderline_margin: config.detection.borderline_margin,
            judge_borderline: config.detection.judge_borderline,
            judge_max_retries: config.judge.max_retries,
            judge_backoff: config.judge.retry_backoff(),
            stale_after: config.detection.stale_after(),
            ..Self::default()
        }
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Orchestrates catalog mutation, job submission and job execution.
pub struct DetectionManager {
    store: Arc<dyn Store>,
    fingerprinters: Fingerprinters,
    comparator: Arc<dyn Comparator>,
    judge: Option<Arc<dyn Judge>>,
    settings: DetectionSettings,
}

impl DetectionManager {
    pub fn new(
        store: Arc<dyn Store>,
        fingerprinters: Fingerprinters,
        comparator: Arc<dyn Comparator>,
        settings: DetectionSettings,
    ) -> Self {
        Self {
            store,
            fingerprinters,
            comparator,
            judge: None,
            settings,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Build a manager over the configured SQLite database.
    ///
    /// Uses the placeholder comparator and the configured judge, if any.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let mut manager = Self::new(
            store,
            Fingerprinters::new(&config.models),
            Arc::new(PlaceholderComparator::new()),
            DetectionSettings::from_config(config),
        );
        if let Some(judge) = create_judge(&config.judge)? {
            manager = manager.with_judge(judge);
        }
        Ok(manager)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Catalog operations with this manager's fingerprint generators.
    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self.store.as_ref(), &self.fingerprinters)
    }

    /// Create a pending job for an existing scanned item.
    pub async fn submit(&self, submission: &JobSubmission) -> Result<DetectionJob, DetectionError> {
        let job = DetectionJob::from_submission(submission, &self.settings.defaults)?;
        if self
            .store
            .get_scanned_item(&job.scanned_item_id)
            .await?
            .is_none()
        {
            return Err(DetectionError::not_found("scanned item", &job.scanned_item_id));
        }

        self.store.insert_job(&job).await?;
        info!(
            job_id = %job.id,
            scanned_item_id = %job.scanned_item_id,
            user_id = %job.user_id,
            threshold = job.similarity_threshold,
            "detection job submitted"
        );
        Ok(job)
    }

    /// Run a job to a terminal state.
    ///
    /// A job that is already completed or failed is not re-run; its
    /// recorded report is returned. A job another run holds in
    /// `processing` is rejected with [`DetectionError::InvalidTransition`]
    /// until it goes stale, at which point this run takes it over.
    pub async fn run_detection(&self, job_id: &str) -> Result<DetectionReport, DetectionError> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| DetectionError::not_found("detection job", job_id))?;

        if let Some(report) = DetectionReport::from_job(&job) {
            debug!(job_id, status = %job.status, "job already terminal, not re-running");
            return Ok(report);
        }

        let now = Utc::now();
        let stale_before = self.settings.stale_before(now);
        if job.status == JobStatus::Processing {
            job.reclaim(now, stale_before)?;
            warn!(job_id, "reclaiming stale processing job");
        } else {
            job.start(now)?;
        }
        job.model_versions = self.fingerprinters.model_versions(&job.modalities);
        if !self.store.claim_job(&job, stale_before).await? {
            debug!(job_id, "job claimed by another run");
            return Err(DetectionError::InvalidTransition {
                from: JobStatus::Processing,
                to: JobStatus::Processing,
            });
        }

        let report = match self.evaluate(&job).await {
            Ok(tally) => {
                job.complete(Utc::now(), tally)?;
                info!(
                    job_id,
                    matches = tally.matches_found,
                    high_confidence = tally.high_confidence_matches,
                    seconds = job.processing_time.unwrap_or_default(),
                    "detection completed"
                );
                DetectionReport::Success {
                    matches_found: tally.matches_found,
                    high_confidence_matches: tally.high_confidence_matches,
                }
            }
            Err(e) => {
                let message = e.to_string();
                job.fail(Utc::now(), message.clone())?;
                error!(job_id, error = %message, "detection failed");
                DetectionReport::Error { error: message }
            }
        };

        self.record_outcome(&job, report).await
    }

    /// Persist a terminal job, retrying the full write and falling back to
    /// a bare `failed` status.
    async fn record_outcome(
        &self,
        job: &DetectionJob,
        report: DetectionReport,
    ) -> Result<DetectionReport, DetectionError> {
        let mut last_error = None;
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self.store.update_job(job).await {
                Ok(true) => return Ok(report),
                Ok(false) => return Err(DetectionError::not_found("detection job", &job.id)),
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "terminal job write failed");
                    last_error = Some(e);
                }
            }
            if attempt < TERMINAL_WRITE_ATTEMPTS {
                let delay = self.settings.store_retry_backoff * (1u32 << (attempt - 1));
                tokio::time::sleep(delay).await;
            }
        }

        let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
        let message = format!("could not record job outcome: {}", cause);
        match self.store.mark_failed(&job.id, &message, Utc::now()).await {
            Ok(_) => {
                error!(job_id = %job.id, error = %message, "job marked failed");
                Ok(DetectionReport::Error { error: message })
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    error = %e,
                    "job left in processing until it goes stale"
                );
                Err(DetectionError::Store(e))
            }
        }
    }

    async fn evaluate(&self, job: &DetectionJob) -> Result<MatchTally, DetectionError> {
        let item = self
            .store
            .get_scanned_item(&job.scanned_item_id)
            .await?
            .ok_or_else(|| DetectionError::not_found("scanned item", &job.scanned_item_id))?;
        let candidates = self
            .store
            .active_catalog(&job.user_id, &job.modalities)
            .await?;
        debug!(job_id = %job.id, candidates = candidates.len(), "catalog snapshot taken");

        let comparator = JobComparator::new(self.comparator.as_ref());
        let band = BorderlineBand::above(job.similarity_threshold, self.settings.borderline_margin);
        let mut tally = MatchTally::default();

        for candidate in &candidates {
            let Some(value) = item.field_for(candidate.modality) else {
                debug!(
                    protected_content_id = %candidate.id,
                    modality = %candidate.modality,
                    "scanned item has no field for modality, skipping"
                );
                continue;
            };

            let item_fp = self.fingerprinters.get(candidate.modality).generate(value);
            let score = comparator.compare(&item_fp, candidate.stored_fingerprint());
            let mut decision = policy::decide(score, job.similarity_threshold);

            let borderline = decision.is_some() && band.contains(score);
            if borderline && self.is_judge_candidate(candidate, &item) {
                decision = self.consult_judge(candidate, &item, decision, score).await;
            }

            let Some(decision) = decision else {
                debug!(protected_content_id = %candidate.id, score, "below threshold");
                continue;
            };

            let write = self
                .store
                .upsert_match(&new_match(job, candidate, &item, &decision))
                .await?;
            debug!(
                protected_content_id = %candidate.id,
                score = decision.score,
                confidence = decision.confidence.as_str(),
                write = ?write,
                "match recorded"
            );
            if write == MatchWrite::Skipped {
                debug!(protected_content_id = %candidate.id, "pair already reviewed, left untouched");
            }
            tally.record(decision.is_high_confidence());
        }

        Ok(tally)
    }

    fn is_judge_candidate(&self, candidate: &ProtectedContent, item: &ScannedItem) -> bool {
        self.judge.is_some()
            && self.settings.judge_borderline
            && candidate.modality == Modality::Text
            && candidate
                .text_content
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
            && item.field_for(Modality::Text).is_some()
    }

    async fn consult_judge(
        &self,
        candidate: &ProtectedContent,
        item: &ScannedItem,
        automated: Option<MatchDecision>,
        score: f64,
    ) -> Option<MatchDecision> {
        let request = JudgeRequest {
            owner: candidate.text_content.clone().unwrap_or_default(),
            candidate: item.text_content.clone().unwrap_or_default(),
            platform: item.platform.clone().unwrap_or_else(|| "unknown".to_string()),
            url: item.content_url.clone().unwrap_or_default(),
        };

        match self.judge_pair(&request).await {
            Ok(verdict) => {
                info!(
                    protected_content_id = %candidate.id,
                    score,
                    decision = verdict.decision.as_str(),
                    judge_score = verdict.similarity_score,
                    "judge verdict applied"
                );
                policy::apply_verdict(automated, &verdict)
            }
            Err(e) => {
                warn!(
                    protected_content_id = %candidate.id,
                    error = %e,
                    "judge unavailable, keeping automated decision"
                );
                automated
            }
        }
    }

    /// Ask the configured judge about one pair, retrying transient failures.
    ///
    /// Backoff doubles from `judge_backoff` per attempt, capped at 32x.
    pub async fn judge_pair(&self, request: &JudgeRequest) -> Result<JudgeVerdict, DetectionError> {
        let judge = self
            .judge
            .as_ref()
            .ok_or_else(|| DetectionError::Validation("no judge provider configured".into()))?;

        let mut attempt: u32 = 0;
        loop {
            match judge::ask(judge.as_ref(), request).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) if e.is_retryable() && attempt < self.settings.judge_max_retries => {
                    attempt += 1;
                    let delay = self.settings.judge_backoff * (1u32 << (attempt - 1).min(5));
                    warn!(
                        judge = judge.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "judge call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn new_match(
    job: &DetectionJob,
    candidate: &ProtectedContent,
    item: &ScannedItem,
    decision: &MatchDecision,
) -> ContentMatch {
    let now = Utc::now();
    ContentMatch {
        id: Uuid::new_v4().to_string(),
        detection_job_id: job.id.clone(),
        protected_content_id: candidate.id.clone(),
        scanned_item_id: item.id.clone(),
        match_type: decision.match_type,
        confidence: decision.confidence,
        similarity_score: decision.score,
        matched_segments: decision.segments.clone(),
        match_metadata: decision.metadata.clone(),
        is_reviewed: false,
        is_confirmed: None,
        reviewed_by: None,
        reviewer_notes: None,
        reviewed_at: None,
        action_taken: ActionTaken::None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use content_guard_core::catalog::NewProtectedContent;
    use content_guard_core::fingerprint::{GeneratorConfig, ModelInfo};
    use content_guard_core::models::{
        Confidence, Fingerprint, JobFilter, MatchFilter, MatchReview, MatchType,
    };
    use content_guard_core::store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fixed(f64);

    impl Comparator for Fixed {
        fn compare(&self, _a: &Fingerprint, _b: &Fingerprint) -> f64 {
            self.0
        }
    }

    /// Counts comparisons.
    struct Counting {
        score: f64,
        calls: AtomicUsize,
    }

    impl Comparator for Counting {
        fn compare(&self, _a: &Fingerprint, _b: &Fingerprint) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.score
        }
    }

    /// In-memory store with scripted job-write failures.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryStore,
        /// Yield after reading a job, so concurrent runs interleave.
        yield_on_get_job: bool,
        /// Terminal `update_job` calls left to fail.
        terminal_failures: AtomicUsize,
        fail_mark_failed: AtomicBool,
    }

    #[async_trait]
    impl Store for ScriptedStore {
        async fn insert_protected_content(&self, c: &ProtectedContent) -> anyhow::Result<()> {
            self.inner.insert_protected_content(c).await
        }
        async fn update_protected_content(&self, c: &ProtectedContent) -> anyhow::Result<bool> {
            self.inner.update_protected_content(c).await
        }
        async fn get_protected_content(&self, id: &str) -> anyhow::Result<Option<ProtectedContent>> {
            self.inner.get_protected_content(id).await
        }
        async fn list_protected_content(&self, user: &str) -> anyhow::Result<Vec<ProtectedContent>> {
            self.inner.list_protected_content(user).await
        }
        async fn active_catalog(
            &self,
            user_id: &str,
            modalities: &[Modality],
        ) -> anyhow::Result<Vec<ProtectedContent>> {
            self.inner.active_catalog(user_id, modalities).await
        }
        async fn insert_scanned_item(&self, item: &ScannedItem) -> anyhow::Result<()> {
            self.inner.insert_scanned_item(item).await
        }
        async fn get_scanned_item(&self, id: &str) -> anyhow::Result<Option<ScannedItem>> {
            self.inner.get_scanned_item(id).await
        }
        async fn insert_job(&self, job: &DetectionJob) -> anyhow::Result<()> {
            self.inner.insert_job(job).await
        }
        async fn update_job(&self, job: &DetectionJob) -> anyhow::Result<bool> {
            let terminal = matches!(job.status, JobStatus::Completed | JobStatus::Failed);
            if terminal {
                let left = self.terminal_failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.terminal_failures.store(left - 1, Ordering::SeqCst);
                    return Err(anyhow!("disk I/O error"));
                }
            }
            self.inner.update_job(job).await
        }
        async fn claim_job(
            &self,
            job: &DetectionJob,
            stale_before: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            self.inner.claim_job(job, stale_before).await
        }
        async fn mark_failed(
            &self,
            id: &str,
            message: &str,
            at: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            if self.fail_mark_failed.load(Ordering::SeqCst) {
                return Err(anyhow!("disk I/O error"));
            }
            self.inner.mark_failed(id, message, at).await
        }
        async fn get_job(&self, id: &str) -> anyhow::Result<Option<DetectionJob>> {
            let job = self.inner.get_job(id).await;
            if self.yield_on_get_job {
                tokio::task::yield_now().await;
            }
            job
        }
        async fn list_jobs(&self, filter: &JobFilter) -> anyhow::Result<Vec<DetectionJob>> {
            self.inner.list_jobs(filter).await
        }
        async fn upsert_match(&self, m: &ContentMatch) -> anyhow::Result<MatchWrite> {
            self.inner.upsert_match(m).await
        }
        async fn get_match(&self, id: &str) -> anyhow::Result<Option<ContentMatch>> {
            self.inner.get_match(id).await
        }
        async fn list_matches(&self, filter: &MatchFilter) -> anyhow::Result<Vec<ContentMatch>> {
            self.inner.list_matches(filter).await
        }
        async fn record_review(&self, id: &str, review: &MatchReview) -> anyhow::Result<bool> {
            self.inner.record_review(id, review).await
        }
    }

    /// Fails `failures` times with a retryable error, then answers.
    struct FlakyJudge {
        failures: usize,
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl Judge for FlakyJudge {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, DetectionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DetectionError::external("503 from upstream", true))
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    fn settings() -> DetectionSettings {
        DetectionSettings {
            judge_backoff: Duration::from_millis(1),
            store_retry_backoff: Duration::from_millis(1),
            ..DetectionSettings::default()
        }
    }

    fn fingerprinters() -> Fingerprinters {
        Fingerprinters::new(&GeneratorConfig {
            text: Some(ModelInfo::new("Default Text Model", "1.0")),
            ..GeneratorConfig::default()
        })
    }

    fn manager(score: f64) -> DetectionManager {
        DetectionManager::new(
            Arc::new(InMemoryStore::new()),
            fingerprinters(),
            Arc::new(Fixed(score)),
            settings(),
        )
    }

    fn text_item(id: &str, body: &str) -> ScannedItem {
        ScannedItem {
            id: id.into(),
            platform: Some("telegram".into()),
            platform_content_id: None,
            modality: Modality::Text,
            title: None,
            author: None,
            text_content: Some(body.into()),
            media_urls: vec![],
            content_url: Some("https://t.me/c/1".into()),
            content_hash: String::new(),
            published_at: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    async fn seed(manager: &DetectionManager, owner_text: &str, item: ScannedItem) -> DetectionJob {
        manager
            .catalog()
            .add(NewProtectedContent::new("user-1", "My Novel", Modality::Text).text(owner_text))
            .await
            .unwrap();
        manager.store().insert_scanned_item(&item).await.unwrap();
        manager
            .submit(&JobSubmission::new(item.id.clone(), "user-1"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identical_text_is_exact_high() {
        let m = manager(0.0);
        let job = seed(&m, "Hello world", text_item("item-1", "Hello world")).await;

        let report = m.run_detection(&job.id).await.unwrap();
        assert_eq!(
            report,
            DetectionReport::Success {
                matches_found: 1,
                high_confidence_matches: 1
            }
        );

        let matches = m.store().list_matches(&MatchFilter::default()).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_type, MatchType::Exact);
        assert_eq!(matches[0].confidence, Confidence::High);
        assert_eq!(matches[0].similarity_score, 1.0);

        let stored = m.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.matches_found, Some(1));
        assert_eq!(
            stored.model_versions.get("text").map(String::as_str),
            Some("Default Text Model@1.0")
        );
        assert!(stored.processing_time.is_some());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let m = manager(0.85);
        let job = seed(&m, "the original text", text_item("item-1", "a different text")).await;

        let first = m.run_detection(&job.id).await.unwrap();
        let second = m.run_detection(&job.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            m.store().list_matches(&MatchFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn processing_job_is_rejected() {
        let m = manager(0.85);
        let job = seed(&m, "owner", text_item("item-1", "candidate")).await;
        let mut stuck = job.clone();
        stuck.start(Utc::now()).unwrap();
        m.store().update_job(&stuck).await.unwrap();

        let err = m.run_detection(&job.id).await.unwrap_err();
        assert!(matches!(err, DetectionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let m = manager(0.85);
        let err = m.run_detection("nope").await.unwrap_err();
        assert!(matches!(err, DetectionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn submit_requires_existing_item() {
        let m = manager(0.85);
        let err = m
            .submit(&JobSubmission::new("ghost", "user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::NotFound { kind: "scanned item", .. }));
    }

    #[tokio::test]
    async fn judge_retries_then_applies_verdict() {
        let judge = Arc::new(FlakyJudge {
            failures: 2,
            calls: AtomicUsize::new(0),
            reply: r#"Sure: {"decision":"yes","similarity_score":0.95,"rationale":"same plot","overlap_phrases":["call me"]}"#.into(),
        });
        let mut s = settings();
        s.judge_borderline = true;
        let m = DetectionManager::new(
            Arc::new(InMemoryStore::new()),
            Fingerprinters::default(),
            Arc::new(Fixed(0.82)),
            s,
        )
        .with_judge(judge.clone());

        let job = seed(&m, "call me ishmael", text_item("item-1", "call me maybe")).await;
        let report = m.run_detection(&job.id).await.unwrap();
        assert_eq!(judge.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            report,
            DetectionReport::Success {
                matches_found: 1,
                high_confidence_matches: 1
            }
        );

        let matches = m.store().list_matches(&MatchFilter::default()).await.unwrap();
        assert_eq!(matches[0].matched_segments, vec!["call me".to_string()]);
        assert_eq!(matches[0].match_metadata["judge"]["decision"], "yes");
    }

    #[tokio::test]
    async fn judge_failure_falls_back_to_threshold() {
        let judge = Arc::new(FlakyJudge {
            failures: 0,
            calls: AtomicUsize::new(0),
            reply: "I cannot answer that.".into(),
        });
        let mut s = settings();
        s.judge_borderline = true;
        let m = DetectionManager::new(
            Arc::new(InMemoryStore::new()),
            Fingerprinters::default(),
            Arc::new(Fixed(0.82)),
            s,
        )
        .with_judge(judge.clone());

        let job = seed(&m, "owner text", text_item("item-1", "candidate text")).await;
        let report = m.run_detection(&job.id).await.unwrap();
        // Unparseable replies are not retried.
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            report,
            DetectionReport::Success {
                matches_found: 1,
                high_confidence_matches: 0
            }
        );
        let matches = m.store().list_matches(&MatchFilter::default()).await.unwrap();
        assert_eq!(matches[0].match_type, MatchType::Partial);
        assert_eq!(matches[0].confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn judge_pair_without_judge_is_rejected() {
        let m = manager(0.5);
        let err = m
            .judge_pair(&JudgeRequest {
                owner: "a".into(),
                candidate: "b".into(),
                platform: "web".into(),
                url: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::Validation(_)));
    }

    #[tokio::test]
    async fn judge_yes_never_creates_a_sub_threshold_match() {
        let judge = Arc::new(FlakyJudge {
            failures: 0,
            calls: AtomicUsize::new(0),
            reply: r#"{"decision":"yes","similarity_score":0.97,"rationale":"same","overlap_phrases":[]}"#.into(),
        });
        let mut s = settings();
        s.judge_borderline = true;
        let m = DetectionManager::new(
            Arc::new(InMemoryStore::new()),
            Fingerprinters::default(),
            Arc::new(Fixed(0.72)),
            s,
        )
        .with_judge(judge.clone());

        let job = seed(&m, "owner text", text_item("item-1", "candidate text")).await;
        let report = m.run_detection(&job.id).await.unwrap();
        assert_eq!(
            report,
            DetectionReport::Success {
                matches_found: 0,
                high_confidence_matches: 0
            }
        );
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
        assert!(m.store().list_matches(&MatchFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_write_is_retried() {
        let store = Arc::new(ScriptedStore {
            terminal_failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let m = DetectionManager::new(
            store.clone(),
            fingerprinters(),
            Arc::new(Fixed(0.85)),
            settings(),
        );
        let job = seed(&m, "owner", text_item("item-1", "candidate")).await;

        let report = m.run_detection(&job.id).await.unwrap();
        assert!(report.is_success());
        let stored = m.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.matches_found, Some(1));
    }

    #[tokio::test]
    async fn persistent_terminal_write_failure_marks_job_failed() {
        let store = Arc::new(ScriptedStore {
            terminal_failures: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let m = DetectionManager::new(
            store.clone(),
            fingerprinters(),
            Arc::new(Fixed(0.85)),
            settings(),
        );
        let job = seed(&m, "owner", text_item("item-1", "candidate")).await;

        let report = m.run_detection(&job.id).await.unwrap();
        match &report {
            DetectionReport::Error { error } => {
                assert!(error.contains("disk I/O error"), "{}", error)
            }
            other => panic!("expected error report, got {:?}", other),
        }
        let stored = m.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error_message.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn unrecordable_job_is_reclaimed_once_stale() {
        let store = Arc::new(ScriptedStore {
            terminal_failures: AtomicUsize::new(TERMINAL_WRITE_ATTEMPTS as usize),
            fail_mark_failed: AtomicBool::new(true),
            ..Default::default()
        });
        let m = DetectionManager::new(
            store.clone(),
            fingerprinters(),
            Arc::new(Fixed(0.85)),
            settings(),
        );
        let job = seed(&m, "owner", text_item("item-1", "candidate")).await;

        let err = m.run_detection(&job.id).await.unwrap_err();
        assert!(matches!(err, DetectionError::Store(_)));
        let stuck = m.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Processing);

        // Still fresh: another run must keep its hands off.
        let err = m.run_detection(&job.id).await.unwrap_err();
        assert!(matches!(err, DetectionError::InvalidTransition { .. }));

        // Age the claim past the stale window and run again.
        let mut aged = stuck.clone();
        aged.started_at = Some(Utc::now() - chrono::Duration::hours(1));
        m.store().update_job(&aged).await.unwrap();
        store.fail_mark_failed.store(false, Ordering::SeqCst);

        let report = m.run_detection(&job.id).await.unwrap();
        assert!(report.is_success());
        let stored = m.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.started_at.unwrap() > aged.started_at.unwrap());
    }

    #[tokio::test]
    async fn concurrent_runs_of_one_job_evaluate_once() {
        let store = Arc::new(ScriptedStore {
            yield_on_get_job: true,
            ..Default::default()
        });
        let comparator = Arc::new(Counting {
            score: 0.85,
            calls: AtomicUsize::new(0),
        });
        let m = DetectionManager::new(store, fingerprinters(), comparator.clone(), settings());
        let job = seed(&m, "owner", text_item("item-1", "candidate")).await;

        let (a, b) = tokio::join!(m.run_detection(&job.id), m.run_detection(&job.id));
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DetectionError::InvalidTransition { .. }))));
        assert_eq!(comparator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            m.store().list_matches(&MatchFilter::default()).await.unwrap().len(),
            1
        );
    }
}
