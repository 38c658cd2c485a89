//! Protected-content catalog.
//!
//! Adds and edits the works a user wants monitored. Fingerprints are
//! derived here and nowhere else: [`Catalog::add`] generates them
//! immediately, and [`Catalog::update`] regenerates them whenever a raw
//! content field or the modality changes. A video entry carries two
//! fingerprints (audio and visual track) built from the same reference.
//!
//! Entries are never deleted; they are soft-disabled through `is_active`
//! and `monitoring_enabled`.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DetectionError;
use crate::fingerprint::Fingerprinters;
use crate::models::{Fingerprint, Modality, ProtectedContent};
use crate::store::Store;

/// Input for [`Catalog::add`]. At least one of text, file or URL is required.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProtectedContent {
    pub user_id: String,
    pub title: String,
    pub modality: Modality,
    pub text_content: Option<String>,
    pub file_path: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub copyright_info: Option<String>,
}

impl NewProtectedContent {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, modality: Modality) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            modality,
            text_content: None,
            file_path: None,
            external_url: None,
            description: None,
            tags: Vec::new(),
            category: None,
            copyright_info: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }

    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }
}

/// Field changes for [`Catalog::update`]. `None` leaves a field alone;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectedContentPatch {
    pub title: Option<String>,
    pub modality: Option<Modality>,
    pub text_content: Option<Option<String>>,
    pub file_path: Option<Option<String>>,
    pub external_url: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub category: Option<Option<String>>,
    pub copyright_info: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub monitoring_enabled: Option<bool>,
}

impl ProtectedContentPatch {
    /// Whether applying the patch changes what the fingerprints derive from.
    pub fn touches_content(&self) -> bool {
        self.modality.is_some()
            || self.text_content.is_some()
            || self.file_path.is_some()
            || self.external_url.is_some()
    }
}

/// Identity hash of a work: `sha256("{user}-{title}-{reference}")`.
pub fn content_hash(user_id: &str, title: &str, reference: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}-{}", user_id, title, reference).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rebuild every fingerprint of `entry` from its current raw content.
///
/// Fields that do not apply to the modality are cleared, so a modality
/// change never leaves a stale fingerprint behind.
pub fn regenerate_fingerprints(entry: &mut ProtectedContent, fingerprinters: &Fingerprinters) {
    entry.text_fingerprint = Fingerprint::empty();
    entry.visual_fingerprint = Fingerprint::empty();
    entry.audio_fingerprint = Fingerprint::empty();

    match entry.modality {
        Modality::Text => {
            if let Some(text) = entry.text_content.as_deref() {
                entry.text_fingerprint = fingerprinters.get(Modality::Text).generate(text);
            }
        }
        Modality::Image => {
            if let Some(reference) = entry.media_reference().map(str::to_string) {
                entry.visual_fingerprint = fingerprinters.get(Modality::Image).generate(&reference);
            }
        }
        Modality::Video => {
            if let Some(reference) = entry.media_reference().map(str::to_string) {
                entry.audio_fingerprint = fingerprinters.get(Modality::Video).generate(&reference);
                entry.visual_fingerprint = fingerprinters.get(Modality::Image).generate(&reference);
            }
        }
    }
}

fn warn_if_not_comparable(entry: &ProtectedContent) {
    if !entry.is_comparable() {
        warn!(
            id = %entry.id,
            modality = %entry.modality,
            "protected content has an empty fingerprint and will never match"
        );
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Catalog operations over a [`Store`].
pub struct Catalog<'a> {
    store: &'a dyn Store,
    fingerprinters: &'a Fingerprinters,
}

impl<'a> Catalog<'a> {
    pub fn new(store: &'a dyn Store, fingerprinters: &'a Fingerprinters) -> Self {
        Self {
            store,
            fingerprinters,
        }
    }

    /// Create a catalog entry with fresh fingerprints.
    pub async fn add(&self, new: NewProtectedContent) -> Result<ProtectedContent, DetectionError> {
        if new.user_id.trim().is_empty() {
            return Err(DetectionError::Validation("user id is required".into()));
        }
        if new.title.trim().is_empty() {
            return Err(DetectionError::Validation("title is required".into()));
        }

        let now = Utc::now();
        let mut entry = ProtectedContent {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            modality: new.modality,
            text_content: clean(new.text_content),
            file_path: clean(new.file_path),
            external_url: clean(new.external_url),
            content_hash: String::new(),
            text_fingerprint: Fingerprint::empty(),
            visual_fingerprint: Fingerprint::empty(),
            audio_fingerprint: Fingerprint::empty(),
            tags: new.tags,
            category: new.category,
            copyright_info: new.copyright_info,
            is_active: true,
            monitoring_enabled: true,
            created_at: now,
            updated_at: now,
        };

        let reference = entry
            .content_reference()
            .map(str::to_string)
            .ok_or_else(|| {
                DetectionError::Validation(
                    "provide text_content, file_path, or external_url".into(),
                )
            })?;
        entry.content_hash = content_hash(&entry.user_id, &entry.title, &reference);
        regenerate_fingerprints(&mut entry, self.fingerprinters);
        warn_if_not_comparable(&entry);

        self.store.insert_protected_content(&entry).await?;
        info!(
            id = %entry.id,
            user_id = %entry.user_id,
            modality = %entry.modality,
            "protected content added"
        );
        Ok(entry)
    }

    /// Apply `patch` to entry `id`, regenerating fingerprints when the raw
    /// content changed.
    pub async fn update(
        &self,
        id: &str,
        patch: ProtectedContentPatch,
    ) -> Result<ProtectedContent, DetectionError> {
        let mut entry = self
            .store
            .get_protected_content(id)
            .await?
            .ok_or_else(|| DetectionError::not_found("protected content", id))?;

        let regenerate = patch.touches_content();
        let title_changed = patch.title.is_some();

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(DetectionError::Validation("title is required".into()));
            }
            entry.title = title;
        }
        if let Some(modality) = patch.modality {
            entry.modality = modality;
        }
        if let Some(text) = patch.text_content {
            entry.text_content = clean(text);
        }
        if let Some(path) = patch.file_path {
            entry.file_path = clean(path);
        }
        if let Some(url) = patch.external_url {
            entry.external_url = clean(url);
        }
        if let Some(description) = patch.description {
            entry.description = description;
        }
        if let Some(tags) = patch.tags {
            entry.tags = tags;
        }
        if let Some(category) = patch.category {
            entry.category = category;
        }
        if let Some(info) = patch.copyright_info {
            entry.copyright_info = info;
        }
        if let Some(active) = patch.is_active {
            entry.is_active = active;
        }
        if let Some(enabled) = patch.monitoring_enabled {
            entry.monitoring_enabled = enabled;
        }

        if regenerate || title_changed {
            let reference = entry
                .content_reference()
                .map(str::to_string)
                .ok_or_else(|| {
                    DetectionError::Validation(
                        "update would leave no text_content, file_path, or external_url".into(),
                    )
                })?;
            entry.content_hash = content_hash(&entry.user_id, &entry.title, &reference);
        }
        if regenerate {
            regenerate_fingerprints(&mut entry, self.fingerprinters);
            debug!(id = %entry.id, "fingerprints regenerated");
            warn_if_not_comparable(&entry);
        }
        entry.updated_at = Utc::now();

        if !self.store.update_protected_content(&entry).await? {
            return Err(DetectionError::not_found("protected content", id));
        }
        Ok(entry)
    }

    pub async fn get(&self, id: &str) -> Result<ProtectedContent, DetectionError> {
        self.store
            .get_protected_content(id)
            .await?
            .ok_or_else(|| DetectionError::not_found("protected content", id))
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<ProtectedContent>, DetectionError> {
        Ok(self.store.list_protected_content(user_id).await?)
    }
}
