//! Job dispatch: the queue contract and two implementations.
//!
//! - [`InlineQueue`] runs each job in the caller's task (eager mode).
//! - [`Dispatcher`] is a tokio worker pool with bounded concurrency and
//!   job-level retry.
//!
//! # Retry policy
//!
//! A job that ends `failed` is immutable, so a retry resubmits it as a
//! fresh job with the same item, user, modalities and threshold after
//! `retry_delay`. A job whose execution returned an error before it was
//! claimed (for example a storage failure) is retried under its own id.
//! Missing records and illegal transitions, including a job another run
//! already holds, are never retried. At most `max_attempts` runs are made per enqueued job.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use content_guard_core::job::{DetectionReport, JobSubmission};
use content_guard_core::DetectionError;

use crate::config::DispatchConfig;
use crate::detect::DetectionManager;

/// Submission and execution contract between callers and the pipeline.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create a job for `submission`, schedule it, and return its id.
    async fn submit(&self, submission: JobSubmission) -> Result<String, DetectionError>;

    /// Schedule an existing job.
    async fn enqueue(&self, job_id: &str) -> Result<(), DetectionError>;
}

/// Runs jobs immediately, in the caller's task.
pub struct InlineQueue {
    manager: Arc<DetectionManager>,
}

impl InlineQueue {
    pub fn new(manager: Arc<DetectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl JobQueue for InlineQueue {
    async fn submit(&self, submission: JobSubmission) -> Result<String, DetectionError> {
        let job = self.manager.submit(&submission).await?;
        self.enqueue(&job.id).await?;
        Ok(job.id)
    }

    async fn enqueue(&self, job_id: &str) -> Result<(), DetectionError> {
        let report = self.manager.run_detection(job_id).await?;
        debug!(job_id, ?report, "inline job finished");
        Ok(())
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&DispatchConfig> for DispatchOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

/// Totals reported by [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Enqueued jobs that eventually completed (possibly after retries).
    pub completed: usize,
    /// Enqueued jobs that were still failing after their last attempt.
    pub failed: usize,
    /// Extra attempts made across all jobs.
    pub retried: usize,
}

#[derive(Debug, Clone, Copy)]
struct JobOutcome {
    completed: bool,
    retried: usize,
}

/// Tokio worker pool executing detection jobs.
pub struct Dispatcher {
    manager: Arc<DetectionManager>,
    tx: mpsc::UnboundedSender<String>,
    handle: JoinHandle<DispatchSummary>,
}

impl Dispatcher {
    /// Start the pool. Must be called inside a tokio runtime.
    pub fn start(manager: Arc<DetectionManager>, options: DispatchOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch_loop(manager.clone(), options, rx));
        Self {
            manager,
            tx,
            handle,
        }
    }

    /// Stop accepting work, wait for every in-flight job and its retries,
    /// and return the totals.
    pub async fn shutdown(self) -> anyhow::Result<DispatchSummary> {
        drop(self.tx);
        let summary = self.handle.await?;
        info!(
            completed = summary.completed,
            failed = summary.failed,
            retried = summary.retried,
            "dispatcher drained"
        );
        Ok(summary)
    }
}

#[async_trait]
impl JobQueue for Dispatcher {
    async fn submit(&self, submission: JobSubmission) -> Result<String, DetectionError> {
        let job = self.manager.submit(&submission).await?;
        self.enqueue(&job.id).await?;
        Ok(job.id)
    }

    async fn enqueue(&self, job_id: &str) -> Result<(), DetectionError> {
        self.tx
            .send(job_id.to_string())
            .map_err(|_| DetectionError::Pipeline("dispatcher is shut down".into()))
    }
}

async fn dispatch_loop(
    manager: Arc<DetectionManager>,
    options: DispatchOptions,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> DispatchSummary {
    let semaphore = Arc::new(Semaphore::new(options.workers));
    let mut tasks = JoinSet::new();

    while let Some(job_id) = rx.recv().await {
        tasks.spawn(run_with_retries(
            manager.clone(),
            semaphore.clone(),
            options.clone(),
            job_id,
        ));
    }

    let mut summary = DispatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                if outcome.completed {
                    summary.completed += 1;
                } else {
                    summary.failed += 1;
                }
                summary.retried += outcome.retried;
            }
            Err(e) => {
                error!(error = %e, "detection task panicked");
                summary.failed += 1;
            }
        }
    }
    summary
}

async fn run_with_retries(
    manager: Arc<DetectionManager>,
    semaphore: Arc<Semaphore>,
    options: DispatchOptions,
    first_job_id: String,
) -> JobOutcome {
    let mut job_id = first_job_id;
    let mut attempt: u32 = 1;
    let mut retried = 0;
    let failed = |retried| JobOutcome {
        completed: false,
        retried,
    };

    loop {
        let result = {
            let Ok(_permit) = semaphore.clone().acquire_owned().await else {
                return failed(retried);
            };
            manager.run_detection(&job_id).await
        };

        let resubmit = match result {
            Ok(DetectionReport::Success { .. }) => {
                return JobOutcome {
                    completed: true,
                    retried,
                }
            }
            Ok(DetectionReport::Error { error }) => {
                warn!(job_id = %job_id, attempt, error = %error, "detection job failed");
                true
            }
            Err(
                e @ (DetectionError::NotFound { .. }
                | DetectionError::InvalidTransition { .. }
                | DetectionError::Validation(_)),
            ) => {
                error!(job_id = %job_id, error = %e, "detection job cannot run");
                return failed(retried);
            }
            Err(e) => {
                warn!(job_id = %job_id, attempt, error = %e, "detection job errored before finishing");
                false
            }
        };

        if attempt >= options.max_attempts {
            error!(job_id = %job_id, attempts = attempt, "giving up on detection job");
            return failed(retried);
        }
        tokio::time::sleep(options.retry_delay).await;

        if resubmit {
            let submission = match manager.store().get_job(&job_id).await {
                Ok(Some(job)) => job.resubmission(),
                Ok(None) => return failed(retried),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "cannot load failed job for retry");
                    return failed(retried);
                }
            };
            match manager.submit(&submission).await {
                Ok(job) => {
                    info!(failed_job_id = %job_id, job_id = %job.id, "resubmitted failed job");
                    job_id = job.id;
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "resubmission rejected");
                    return failed(retried);
                }
            }
        }

        attempt += 1;
        retried += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, Utc};
    use content_guard_core::catalog::NewProtectedContent;
    use content_guard_core::compare::PlaceholderComparator;
    use content_guard_core::fingerprint::Fingerprinters;
    use content_guard_core::models::{
        ContentMatch, DetectionJob, JobFilter, JobStatus, MatchFilter, MatchReview, Modality,
        ProtectedContent, ScannedItem,
    };
    use content_guard_core::store::memory::InMemoryStore;
    use content_guard_core::store::{MatchWrite, Store};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::detect::DetectionSettings;

    /// In-memory store whose catalog snapshot fails a set number of times.
    struct FlakyCatalogStore {
        inner: InMemoryStore,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Store for FlakyCatalogStore {
        async fn insert_protected_content(&self, c: &ProtectedContent) -> Result<()> {
            self.inner.insert_protected_content(c).await
        }
        async fn update_protected_content(&self, c: &ProtectedContent) -> Result<bool> {
            self.inner.update_protected_content(c).await
        }
        async fn get_protected_content(&self, id: &str) -> Result<Option<ProtectedContent>> {
            self.inner.get_protected_content(id).await
        }
        async fn list_protected_content(&self, user_id: &str) -> Result<Vec<ProtectedContent>> {
            self.inner.list_protected_content(user_id).await
        }
        async fn active_catalog(
            &self,
            user_id: &str,
            modalities: &[Modality],
        ) -> Result<Vec<ProtectedContent>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(anyhow!("database is locked"));
            }
            self.inner.active_catalog(user_id, modalities).await
        }
        async fn insert_scanned_item(&self, item: &ScannedItem) -> Result<()> {
            self.inner.insert_scanned_item(item).await
        }
        async fn get_scanned_item(&self, id: &str) -> Result<Option<ScannedItem>> {
            self.inner.get_scanned_item(id).await
        }
        async fn insert_job(&self, job: &DetectionJob) -> Result<()> {
            self.inner.insert_job(job).await
        }
        async fn update_job(&self, job: &DetectionJob) -> Result<bool> {
            self.inner.update_job(job).await
        }
        async fn claim_job(&self, job: &DetectionJob, stale_before: DateTime<Utc>) -> Result<bool> {
            self.inner.claim_job(job, stale_before).await
        }
        async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<bool> {
            self.inner.mark_failed(id, message, at).await
        }
        async fn get_job(&self, id: &str) -> Result<Option<DetectionJob>> {
            self.inner.get_job(id).await
        }
        async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<DetectionJob>> {
            self.inner.list_jobs(filter).await
        }
        async fn upsert_match(&self, m: &ContentMatch) -> Result<MatchWrite> {
            self.inner.upsert_match(m).await
        }
        async fn get_match(&self, id: &str) -> Result<Option<ContentMatch>> {
            self.inner.get_match(id).await
        }
        async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<ContentMatch>> {
            self.inner.list_matches(filter).await
        }
        async fn record_review(&self, match_id: &str, review: &MatchReview) -> Result<bool> {
            self.inner.record_review(match_id, review).await
        }
    }

    fn options(max_attempts: u32) -> DispatchOptions {
        DispatchOptions {
            workers: 2,
            max_attempts,
            retry_delay: Duration::from_millis(5),
        }
    }

    async fn manager_with(store: Arc<dyn Store>, items: usize) -> Arc<DetectionManager> {
        let manager = DetectionManager::new(
            store,
            Fingerprinters::default(),
            Arc::new(PlaceholderComparator::seeded(11)),
            DetectionSettings::default(),
        );
        manager
            .catalog()
            .add(NewProtectedContent::new("user-1", "Poem", Modality::Text).text("Hello world"))
            .await
            .unwrap();
        for i in 0..items {
            manager
                .store()
                .insert_scanned_item(&ScannedItem {
                    id: format!("item-{}", i),
                    platform: None,
                    platform_content_id: None,
                    modality: Modality::Text,
                    title: None,
                    author: None,
                    text_content: Some("Hello world".into()),
                    media_urls: vec![],
                    content_url: None,
                    content_hash: String::new(),
                    published_at: None,
                    metadata: serde_json::json!({}),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        Arc::new(manager)
    }

    #[tokio::test]
    async fn inline_queue_runs_immediately() {
        let manager = manager_with(Arc::new(InMemoryStore::new()), 1).await;
        let queue = InlineQueue::new(manager.clone());

        let job_id = queue
            .submit(JobSubmission::new("item-0", "user-1"))
            .await
            .unwrap();
        let job = manager.store().get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.matches_found, Some(1));
    }

    #[tokio::test]
    async fn pool_completes_every_job() {
        let manager = manager_with(Arc::new(InMemoryStore::new()), 5).await;
        let dispatcher = Dispatcher::start(manager.clone(), options(3));
        for i in 0..5 {
            dispatcher
                .submit(JobSubmission::new(format!("item-{}", i), "user-1"))
                .await
                .unwrap();
        }

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                completed: 5,
                failed: 0,
                retried: 0
            }
        );
        let completed = manager
            .store()
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 5);
    }

    #[tokio::test]
    async fn failed_job_is_resubmitted() {
        let store = Arc::new(FlakyCatalogStore {
            inner: InMemoryStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        let manager = manager_with(store, 1).await;
        let dispatcher = Dispatcher::start(manager.clone(), options(3));
        let first = dispatcher
            .submit(JobSubmission::new("item-0", "user-1"))
            .await
            .unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                completed: 1,
                failed: 0,
                retried: 1
            }
        );

        let first = manager.store().get_job(&first).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Failed);
        assert!(first
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("database is locked")));

        let jobs = manager.store().list_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = Arc::new(FlakyCatalogStore {
            inner: InMemoryStore::new(),
            failures_left: AtomicUsize::new(10),
        });
        let manager = manager_with(store, 1).await;
        let dispatcher = Dispatcher::start(manager.clone(), options(2));
        dispatcher
            .submit(JobSubmission::new("item-0", "user-1"))
            .await
            .unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                completed: 0,
                failed: 1,
                retried: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_job_is_not_retried() {
        let manager = manager_with(Arc::new(InMemoryStore::new()), 0).await;
        let dispatcher = Dispatcher::start(manager, options(3));
        dispatcher.enqueue("missing-job").await.unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retried, 0);
    }
}
