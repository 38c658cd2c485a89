//! `cguard detect`, `cguard jobs` and `cguard judge` commands.

use anyhow::{bail, Result};
use std::sync::Arc;

use content_guard_core::job::{DetectionReport, JobSubmission};
use content_guard_core::judge::JudgeRequest;
use content_guard_core::models::{DetectionJob, JobFilter, JobStatus, Modality};

use crate::config::Config;
use crate::detect::DetectionManager;
use crate::dispatch::{DispatchOptions, Dispatcher, InlineQueue, JobQueue};

fn print_report(job_id: &str, report: &DetectionReport) {
    println!("job: {}", job_id);
    match report {
        DetectionReport::Success {
            matches_found,
            high_confidence_matches,
        } => {
            println!("status: completed");
            println!("matches found: {}", matches_found);
            println!("high confidence: {}", high_confidence_matches);
        }
        DetectionReport::Error { error } => {
            println!("status: failed");
            println!("error: {}", error);
        }
    }
}

/// `cguard detect submit <item> --user <id>`; with `--wait` the job runs
/// in this process before returning.
pub async fn run_submit(
    config: &Config,
    item_id: &str,
    user_id: &str,
    modalities: Vec<Modality>,
    threshold: Option<f64>,
    wait: bool,
) -> Result<()> {
    let manager = Arc::new(DetectionManager::from_config(config).await?);
    let submission = JobSubmission {
        scanned_item_id: item_id.to_string(),
        user_id: user_id.to_string(),
        modalities: if modalities.is_empty() {
            None
        } else {
            Some(modalities)
        },
        threshold,
    };

    if wait {
        let job_id = InlineQueue::new(manager.clone()).submit(submission).await?;
        let report = manager.run_detection(&job_id).await?;
        print_report(&job_id, &report);
    } else {
        let job = manager.submit(&submission).await?;
        println!("job: {}", job.id);
        println!("status: {}", job.status);
    }
    Ok(())
}

/// `cguard detect run <job>`.
pub async fn run_job(config: &Config, job_id: &str) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let report = manager.run_detection(job_id).await?;
    print_report(job_id, &report);
    Ok(())
}

/// `cguard detect drain`: push every pending job through the worker pool.
pub async fn run_drain(config: &Config, limit: Option<usize>) -> Result<()> {
    let manager = Arc::new(DetectionManager::from_config(config).await?);
    let pending = manager
        .store()
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Pending),
            limit,
            ..Default::default()
        })
        .await?;

    if pending.is_empty() {
        println!("No pending jobs.");
        return Ok(());
    }

    let dispatcher = Dispatcher::start(manager, DispatchOptions::from(&config.dispatch));
    for job in &pending {
        dispatcher.enqueue(&job.id).await?;
    }
    let summary = dispatcher.shutdown().await?;

    println!("drain");
    println!("  jobs dispatched: {}", pending.len());
    println!("  completed: {}", summary.completed);
    println!("  failed: {}", summary.failed);
    println!("  retried: {}", summary.retried);
    Ok(())
}

pub async fn run_jobs_get(config: &Config, job_id: &str) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let Some(job) = manager.store().get_job(job_id).await? else {
        bail!("detection job not found: {}", job_id);
    };
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn print_job_row(job: &DetectionJob) {
    let matches = job
        .matches_found
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<36}  {:<10}  {:>7}  {:>9.2}  {}",
        job.id,
        job.status,
        matches,
        job.similarity_threshold,
        job.created_at.format("%Y-%m-%d %H:%M")
    );
}

pub async fn run_jobs_list(
    config: &Config,
    user_id: Option<String>,
    status: Option<JobStatus>,
    limit: usize,
) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let jobs = manager
        .store()
        .list_jobs(&JobFilter {
            user_id,
            status,
            limit: Some(limit),
        })
        .await?;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>7}  {:>9}  CREATED",
        "ID", "STATUS", "MATCHES", "THRESHOLD"
    );
    for job in &jobs {
        print_job_row(job);
    }
    Ok(())
}

/// `cguard judge`: ask the configured judge about one pair of texts.
pub async fn run_judge(config: &Config, request: JudgeRequest) -> Result<()> {
    if !config.judge.is_enabled() {
        bail!("judge provider is disabled; set [judge] provider in the config");
    }
    let manager = DetectionManager::from_config(config).await?;
    let verdict = manager.judge_pair(&request).await?;

    println!("decision: {}", verdict.decision.as_str());
    println!("similarity_score: {:.2}", verdict.similarity_score);
    println!("rationale: {}", verdict.rationale);
    if !verdict.overlap_phrases.is_empty() {
        println!("overlap:");
        for phrase in &verdict.overlap_phrases {
            println!("  - {}", phrase);
        }
    }
    Ok(())
}
