//! `cguard matches` commands: list, inspect and review content matches.

use anyhow::{bail, Result};
use chrono::Utc;

use content_guard_core::models::{ActionTaken, ContentMatch, MatchFilter, MatchReview};

use crate::config::Config;
use crate::detect::DetectionManager;

fn review_state(m: &ContentMatch) -> &'static str {
    match (m.is_reviewed, m.is_confirmed) {
        (false, _) => "pending",
        (true, Some(true)) => "confirmed",
        (true, Some(false)) => "rejected",
        (true, None) => "reviewed",
    }
}

pub async fn run_matches_list(config: &Config, filter: MatchFilter) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let matches = manager.store().list_matches(&filter).await?;

    if matches.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    println!(
        "{:<36}  {:>5}  {:<7}  {:<6}  {:<9}  PROTECTED CONTENT",
        "ID", "SCORE", "TYPE", "CONF", "REVIEW"
    );
    for m in &matches {
        println!(
            "{:<36}  {:>5.2}  {:<7}  {:<6}  {:<9}  {}",
            m.id,
            m.similarity_score,
            m.match_type.as_str(),
            m.confidence.as_str(),
            review_state(m),
            m.protected_content_id
        );
    }
    println!();
    println!("{} match{}", matches.len(), if matches.len() == 1 { "" } else { "es" });
    Ok(())
}

pub async fn run_matches_get(config: &Config, id: &str) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let Some(m) = manager.store().get_match(id).await? else {
        bail!("content match not found: {}", id);
    };
    println!("{}", serde_json::to_string_pretty(&m)?);
    Ok(())
}

pub async fn run_matches_review(
    config: &Config,
    id: &str,
    reviewer: &str,
    confirmed: bool,
    notes: Option<String>,
    action: ActionTaken,
) -> Result<()> {
    if reviewer.trim().is_empty() {
        bail!("--reviewer must not be empty");
    }
    let manager = DetectionManager::from_config(config).await?;
    let review = MatchReview {
        reviewer: reviewer.to_string(),
        confirmed,
        notes,
        action,
        reviewed_at: Utc::now(),
    };

    if !manager.store().record_review(id, &review).await? {
        bail!("content match not found: {}", id);
    }
    println!("match: {}", id);
    println!("review: {}", if confirmed { "confirmed" } else { "rejected" });
    println!("action: {}", action.as_str());
    Ok(())
}
