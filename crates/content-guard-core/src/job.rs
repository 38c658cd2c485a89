//! Detection job lifecycle.
//!
//! ```text
//! pending ──start──▶ processing ──complete──▶ completed
//!                         │
//!                         └──────fail───────▶ failed
//! ```
//!
//! No other transition is allowed. Entering `processing` stamps
//! `started_at`; entering a terminal state stamps `completed_at` and the
//! processing time. Terminal jobs are immutable.
//!
//! A runner that dies mid-job leaves it in `processing`. Once its
//! `started_at` is older than the stale cutoff another runner may
//! [`reclaim`](DetectionJob::reclaim) it, which restamps `started_at`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DetectionError;
use crate::models::{DetectionJob, JobStatus, Modality};

/// Inbound request to evaluate one scanned item for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmission {
    pub scanned_item_id: String,
    pub user_id: String,
    /// Requested modalities; `None` or empty means all three.
    pub modalities: Option<Vec<Modality>>,
    /// Per-job override of the user's default threshold.
    pub threshold: Option<f64>,
}

impl JobSubmission {
    pub fn new(scanned_item_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            scanned_item_id: scanned_item_id.into(),
            user_id: user_id.into(),
            modalities: None,
            threshold: None,
        }
    }
}

/// Defaults applied to a submission that leaves fields unset.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefaults {
    pub similarity_threshold: f64,
    pub modalities: Vec<Modality>,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            modalities: Modality::ALL.to_vec(),
        }
    }
}

/// Per-run counters, recorded on the job when it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchTally {
    pub matches_found: u64,
    pub high_confidence_matches: u64,
}

impl MatchTally {
    pub fn record(&mut self, high_confidence: bool) {
        self.matches_found += 1;
        if high_confidence {
            self.high_confidence_matches += 1;
        }
    }
}

/// Result of running a job, as reported to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DetectionReport {
    Success {
        matches_found: u64,
        high_confidence_matches: u64,
    },
    Error {
        error: String,
    },
}

impl DetectionReport {
    /// Rebuild the report recorded on a terminal job.
    pub fn from_job(job: &DetectionJob) -> Option<Self> {
        match job.status {
            JobStatus::Completed => Some(DetectionReport::Success {
                matches_found: job.matches_found.unwrap_or(0),
                high_confidence_matches: job.high_confidence_matches.unwrap_or(0),
            }),
            JobStatus::Failed => Some(DetectionReport::Error {
                error: job.error_message.clone().unwrap_or_default(),
            }),
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectionReport::Success { .. })
    }
}

impl DetectionJob {
    /// Build a pending job from a submission.
    pub fn from_submission(
        submission: &JobSubmission,
        defaults: &JobDefaults,
    ) -> Result<Self, DetectionError> {
        if submission.user_id.trim().is_empty() {
            return Err(DetectionError::Validation("user id is required".into()));
        }
        if submission.scanned_item_id.trim().is_empty() {
            return Err(DetectionError::Validation(
                "scanned item id is required".into(),
            ));
        }

        let threshold = submission
            .threshold
            .unwrap_or(defaults.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DetectionError::Validation(format!(
                "similarity threshold {} outside [0, 1]",
                threshold
            )));
        }

        let requested = match &submission.modalities {
            Some(list) if !list.is_empty() => list.clone(),
            _ if !defaults.modalities.is_empty() => defaults.modalities.clone(),
            _ => Modality::ALL.to_vec(),
        };
        let mut modalities: Vec<Modality> = Vec::with_capacity(requested.len());
        for m in requested {
            if !modalities.contains(&m) {
                modalities.push(m);
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: submission.user_id.clone(),
            scanned_item_id: submission.scanned_item_id.clone(),
            status: JobStatus::Pending,
            modalities,
            similarity_threshold: threshold,
            started_at: None,
            completed_at: None,
            error_message: None,
            model_versions: Default::default(),
            processing_time: None,
            matches_found: None,
            high_confidence_matches: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The submission that would recreate this job.
    pub fn resubmission(&self) -> JobSubmission {
        JobSubmission {
            scanned_item_id: self.scanned_item_id.clone(),
            user_id: self.user_id.clone(),
            modalities: Some(self.modalities.clone()),
            threshold: Some(self.similarity_threshold),
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), DetectionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if !allowed {
            return Err(DetectionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `pending → processing`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), DetectionError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Whether a `processing` job was started before `stale_before` and can
    /// be taken over.
    pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.started_at.map_or(true, |started| started < stale_before)
    }

    /// Take over a stale `processing` job, restarting its clock.
    pub fn reclaim(
        &mut self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<(), DetectionError> {
        if !self.is_stale(stale_before) {
            return Err(DetectionError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `processing → completed`, recording the tally.
    pub fn complete(&mut self, now: DateTime<Utc>, tally: MatchTally) -> Result<(), DetectionError> {
        self.transition(JobStatus::Completed)?;
        self.matches_found = Some(tally.matches_found);
        self.high_confidence_matches = Some(tally.high_confidence_matches);
        self.finish(now);
        Ok(())
    }

    /// `processing → failed`, recording the error text verbatim.
    pub fn fail(&mut self, now: DateTime<Utc>, message: impl Into<String>) -> Result<(), DetectionError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        self.finish(now);
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.updated_at = now;
        self.processing_time = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0);
    }
}
