//! Core data models used throughout Content Guard.
//!
//! These types represent the protected works, scanned platform items,
//! detection jobs and surviving matches that flow through the detection
//! pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

/// Content type category; selects the fingerprint generator and comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Video,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Image, Modality::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Video => "video",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "image" => Ok(Modality::Image),
            "video" => Ok(Modality::Video),
            other => Err(DetectionError::Validation(format!(
                "unknown modality '{}': must be text, image, or video",
                other
            ))),
        }
    }
}

/// Key holding the primary digest inside a [`Fingerprint`].
pub const DIGEST_KEY: &str = "hash";

/// Opaque comparable representation of a piece of content.
///
/// Serialises as a flat JSON object, e.g. `{"hash": "1a2b..."}`. The empty
/// object `{}` is the explicit "nothing to compare" fingerprint and never
/// matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(BTreeMap<String, String>);

impl Fingerprint {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_digest(digest: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(DIGEST_KEY.to_string(), digest.into());
        Self(fields)
    }

    /// Add an extra feature next to the digest.
    pub fn with_feature(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn digest(&self) -> Option<&str> {
        self.0.get(DIGEST_KEY).map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A work under monitoring, owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedContent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub modality: Modality,
    pub text_content: Option<String>,
    pub file_path: Option<String>,
    pub external_url: Option<String>,
    pub content_hash: String,
    pub text_fingerprint: Fingerprint,
    pub visual_fingerprint: Fingerprint,
    pub audio_fingerprint: Fingerprint,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub copyright_info: Option<String>,
    pub is_active: bool,
    pub monitoring_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProtectedContent {
    /// The authoritative raw reference: inline text, then file, then URL.
    pub fn content_reference(&self) -> Option<&str> {
        non_empty(self.text_content.as_deref())
            .or_else(|| self.media_reference())
    }

    /// Locator used for image and video fingerprints.
    pub fn media_reference(&self) -> Option<&str> {
        non_empty(self.file_path.as_deref()).or_else(|| non_empty(self.external_url.as_deref()))
    }

    /// The fingerprint that participates in comparisons for this modality.
    ///
    /// Video entries carry both tracks; the audio track is the one compared
    /// against a candidate's canonical URL.
    pub fn stored_fingerprint(&self) -> &Fingerprint {
        match self.modality {
            Modality::Text => &self.text_fingerprint,
            Modality::Image => &self.visual_fingerprint,
            Modality::Video => &self.audio_fingerprint,
        }
    }

    pub fn is_monitored(&self) -> bool {
        self.is_active && self.monitoring_enabled
    }

    /// Whether the fingerprint used for comparison is populated. A text
    /// entry registered by URL only is stored but never matches.
    pub fn is_comparable(&self) -> bool {
        !self.stored_fingerprint().is_empty()
    }
}

/// One piece of content observed on an external platform. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedItem {
    pub id: String,
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
    pub content_hash: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl ScannedItem {
    /// The field compared against catalog entries of `modality`, if present.
    pub fn field_for(&self, modality: Modality) -> Option<&str> {
        match modality {
            Modality::Text => non_empty(self.text_content.as_deref()),
            Modality::Image => non_empty(self.media_urls.first().map(String::as_str)),
            Modality::Video => non_empty(self.content_url.as_deref()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Lifecycle state of a [`DetectionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DetectionError::Validation(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// One evaluation run of a scanned item against a user's catalog.
///
/// Status changes go through the methods in [`crate::job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionJob {
    pub id: String,
    pub user_id: String,
    pub scanned_item_id: String,
    pub status: JobStatus,
    pub modalities: Vec<Modality>,
    pub similarity_threshold: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub model_versions: BTreeMap<String, String>,
    /// Wall-clock seconds spent in `processing`.
    pub processing_time: Option<f64>,
    pub matches_found: Option<u64>,
    pub high_confidence_matches: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Partial => "partial",
        }
    }
}

impl FromStr for MatchType {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchType::Exact),
            "partial" => Ok(MatchType::Partial),
            other => Err(DetectionError::Validation(format!(
                "unknown match type '{}'",
                other
            ))),
        }
    }
}

/// Coarse bucket used to prioritise human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl FromStr for Confidence {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(DetectionError::Validation(format!(
                "unknown confidence level '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTaken {
    #[default]
    None,
    Reported,
    Takedown,
    Ignored,
}

impl ActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTaken::None => "none",
            ActionTaken::Reported => "reported",
            ActionTaken::Takedown => "takedown",
            ActionTaken::Ignored => "ignored",
        }
    }
}

impl FromStr for ActionTaken {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ActionTaken::None),
            "reported" => Ok(ActionTaken::Reported),
            "takedown" => Ok(ActionTaken::Takedown),
            "ignored" => Ok(ActionTaken::Ignored),
            other => Err(DetectionError::Validation(format!(
                "unknown action '{}': must be none, reported, takedown, or ignored",
                other
            ))),
        }
    }
}

/// A comparison result that survived the match decision policy.
///
/// At most one row exists per (protected content, scanned item) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMatch {
    pub id: String,
    pub detection_job_id: String,
    pub protected_content_id: String,
    pub scanned_item_id: String,
    pub match_type: MatchType,
    pub confidence: Confidence,
    pub similarity_score: f64,
    pub matched_segments: Vec<String>,
    pub match_metadata: serde_json::Value,
    pub is_reviewed: bool,
    pub is_confirmed: Option<bool>,
    pub reviewed_by: Option<String>,
    pub reviewer_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub action_taken: ActionTaken,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a human review, applied by [`Store::record_review`](crate::store::Store::record_review).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReview {
    pub reviewer: String,
    pub confirmed: bool,
    pub notes: Option<String>,
    pub action: ActionTaken,
    pub reviewed_at: DateTime<Utc>,
}

/// Filter for listing matches. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    pub job_id: Option<String>,
    /// Owner of the protected content.
    pub user_id: Option<String>,
    pub reviewed: Option<bool>,
}

/// Filter for listing jobs. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned(text: Option<&str>, media: &[&str], url: Option<&str>) -> ScannedItem {
        ScannedItem {
            id: "item-1".into(),
            platform: Some("telegram".into()),
            platform_content_id: None,
            modality: Modality::Text,
            title: None,
            author: None,
            text_content: text.map(String::from),
            media_urls: media.iter().map(|s| s.to_string()).collect(),
            content_url: url.map(String::from),
            content_hash: String::new(),
            published_at: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn modality_parses_case_insensitively() {
        assert_eq!("Video".parse::<Modality>().unwrap(), Modality::Video);
        assert!("audio".parse::<Modality>().is_err());
    }

    #[test]
    fn fingerprint_serialises_as_flat_object() {
        let fp = Fingerprint::from_digest("abcd");
        assert_eq!(serde_json::to_string(&fp).unwrap(), r#"{"hash":"abcd"}"#);
        let empty: Fingerprint = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.digest(), None);
    }

    #[test]
    fn field_for_picks_modality_field() {
        let item = scanned(
            Some("hello"),
            &["https://cdn/a.jpg", "https://cdn/b.jpg"],
            Some("https://t.me/c/1"),
        );
        assert_eq!(item.field_for(Modality::Text), Some("hello"));
        assert_eq!(item.field_for(Modality::Image), Some("https://cdn/a.jpg"));
        assert_eq!(item.field_for(Modality::Video), Some("https://t.me/c/1"));
    }

    #[test]
    fn field_for_ignores_blank_fields() {
        let item = scanned(Some("   "), &[], Some(""));
        for modality in Modality::ALL {
            assert_eq!(item.field_for(modality), None);
        }
    }

    #[test]
    fn scanned_item_deserialises_with_defaults() {
        let item: ScannedItem =
            serde_json::from_str(r#"{"id":"x","modality":"image","media_urls":["u"]}"#).unwrap();
        assert_eq!(item.media_urls, vec!["u".to_string()]);
        assert_eq!(item.metadata, serde_json::json!({}));
        assert!(item.text_content.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
