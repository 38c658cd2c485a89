//! `cguard catalog` commands: add, update, get and list protected content.

use anyhow::Result;

use content_guard_core::catalog::{NewProtectedContent, ProtectedContentPatch};
use content_guard_core::models::{Modality, ProtectedContent};

use crate::config::Config;
use crate::detect::DetectionManager;

/// Raw-content and descriptive fields shared by `add` and `update`.
#[derive(Debug, Clone, Default)]
pub struct ContentArgs {
    pub text: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub copyright_info: Option<String>,
}

/// Switches only `update` understands.
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    pub title: Option<String>,
    pub modality: Option<Modality>,
    pub clear_text: bool,
    pub clear_file: bool,
    pub clear_url: bool,
    pub active: Option<bool>,
    pub monitoring: Option<bool>,
}

fn fingerprint_summary(entry: &ProtectedContent) -> String {
    let mut parts = Vec::new();
    for (name, fp) in [
        ("text", &entry.text_fingerprint),
        ("visual", &entry.visual_fingerprint),
        ("audio", &entry.audio_fingerprint),
    ] {
        if let Some(digest) = fp.digest() {
            parts.push(format!("{}={}", name, digest));
        }
    }
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(" ")
    }
}

fn print_entry(entry: &ProtectedContent) {
    println!("id: {}", entry.id);
    println!("user: {}", entry.user_id);
    println!("title: {}", entry.title);
    println!("modality: {}", entry.modality);
    println!("content_hash: {}", entry.content_hash);
    println!("fingerprints: {}", fingerprint_summary(entry));
    println!("active: {}", entry.is_active);
    println!("monitoring: {}", entry.monitoring_enabled);
    if !entry.tags.is_empty() {
        println!("tags: {}", entry.tags.join(", "));
    }
}

pub async fn run_catalog_add(
    config: &Config,
    user_id: &str,
    title: &str,
    modality: Modality,
    content: ContentArgs,
) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;

    let mut new = NewProtectedContent::new(user_id, title, modality);
    new.text_content = content.text;
    new.file_path = content.file;
    new.external_url = content.url;
    new.description = content.description;
    new.tags = content.tags.unwrap_or_default();
    new.category = content.category;
    new.copyright_info = content.copyright_info;

    let entry = manager.catalog().add(new).await?;
    print_entry(&entry);
    Ok(())
}

/// Build a patch from CLI flags. `--clear-*` wins over a value for the same
/// field.
pub fn build_patch(content: ContentArgs, update: UpdateArgs) -> ProtectedContentPatch {
    fn field(clear: bool, value: Option<String>) -> Option<Option<String>> {
        if clear {
            Some(None)
        } else {
            value.map(Some)
        }
    }

    ProtectedContentPatch {
        title: update.title,
        modality: update.modality,
        text_content: field(update.clear_text, content.text),
        file_path: field(update.clear_file, content.file),
        external_url: field(update.clear_url, content.url),
        description: content.description.map(Some),
        tags: content.tags,
        category: content.category.map(Some),
        copyright_info: content.copyright_info.map(Some),
        is_active: update.active,
        monitoring_enabled: update.monitoring,
    }
}

pub async fn run_catalog_update(
    config: &Config,
    id: &str,
    content: ContentArgs,
    update: UpdateArgs,
) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let patch = build_patch(content, update);
    let regenerated = patch.touches_content();

    let entry = manager.catalog().update(id, patch).await?;
    print_entry(&entry);
    if regenerated {
        println!("fingerprints regenerated");
    }
    Ok(())
}

pub async fn run_catalog_get(config: &Config, id: &str) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let entry = manager.catalog().get(id).await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

pub async fn run_catalog_list(config: &Config, user_id: &str) -> Result<()> {
    let manager = DetectionManager::from_config(config).await?;
    let entries = manager.catalog().list(user_id).await?;

    if entries.is_empty() {
        println!("No protected content for user {}.", user_id);
        return Ok(());
    }

    println!(
        "{:<36}  {:<6}  {:<7}  {:<10}  TITLE",
        "ID", "TYPE", "ACTIVE", "MONITORED"
    );
    for e in &entries {
        println!(
            "{:<36}  {:<6}  {:<7}  {:<10}  {}",
            e.id, e.modality, e.is_active, e.monitoring_enabled, e.title
        );
    }
    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}
