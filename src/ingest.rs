//! Scanned item ingestion.
//!
//! Platform scanners deliver normalized records as JSON (one object or an
//! array). This module fills in a missing id and content hash, stores the
//! items, and optionally creates and runs a detection job for each one.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use content_guard_core::job::JobSubmission;
use content_guard_core::models::{Modality, ScannedItem};

use crate::config::Config;
use crate::detect::DetectionManager;
use crate::dispatch::{InlineQueue, JobQueue};

/// A scanned item as delivered by an ingestion collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannedItemInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub platform_content_id: Option<String>,
    pub modality: Modality,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ScannedItemInput>),
    One(Box<ScannedItemInput>),
}

/// Parse a JSON document holding one item or an array of items.
pub fn parse_items(json: &str) -> Result<Vec<ScannedItemInput>> {
    let parsed: OneOrMany =
        serde_json::from_str(json).context("Failed to parse scanned item JSON")?;
    Ok(match parsed {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![*item],
    })
}

/// Hash of the observable content, used for dedup downstream.
fn item_hash(input: &ScannedItemInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.platform.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(input.text_content.as_deref().unwrap_or_default().as_bytes());
    for url in &input.media_urls {
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
    }
    hasher.update(b"\0");
    hasher.update(input.content_url.as_deref().unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fill defaults and produce the stored record.
pub fn normalize(input: ScannedItemInput) -> ScannedItem {
    let content_hash = input
        .content_hash
        .clone()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| item_hash(&input));
    ScannedItem {
        id: input
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        platform: input.platform,
        platform_content_id: input.platform_content_id,
        modality: input.modality,
        title: input.title,
        author: input.author,
        text_content: input.text_content,
        media_urls: input.media_urls,
        content_url: input.content_url,
        content_hash,
        published_at: input.published_at,
        metadata: input.metadata.unwrap_or_else(|| serde_json::json!({})),
        created_at: Utc::now(),
    }
}

/// `cguard item add <file> [--detect --user <id>]`.
pub async fn run_item_add(
    config: &Config,
    path: &Path,
    detect_for: Option<String>,
    threshold: Option<f64>,
) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let inputs = parse_items(&raw)?;
    if inputs.is_empty() {
        bail!("{} contains no scanned items", path.display());
    }

    let manager = Arc::new(DetectionManager::from_config(config).await?);
    let queue = InlineQueue::new(manager.clone());

    let mut stored = 0u64;
    let mut jobs = 0u64;
    for input in inputs {
        let item = normalize(input);
        manager.store().insert_scanned_item(&item).await?;
        stored += 1;
        println!("item {} ({})", item.id, item.modality);

        if let Some(user_id) = &detect_for {
            let mut submission = JobSubmission::new(item.id.clone(), user_id.clone());
            submission.threshold = threshold;
            let job_id = queue.submit(submission).await?;
            let job = manager
                .store()
                .get_job(&job_id)
                .await?
                .with_context(|| format!("job {} vanished", job_id))?;
            println!(
                "  job {}: {} (matches: {}, high confidence: {})",
                job.id,
                job.status,
                job.matches_found.unwrap_or(0),
                job.high_confidence_matches.unwrap_or(0)
            );
            jobs += 1;
        }
    }

    println!("items stored: {}", stored);
    if detect_for.is_some() {
        println!("jobs run: {}", jobs);
    }
    Ok(())
}
