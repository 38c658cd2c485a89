//! Per-modality fingerprint generators.
//!
//! A generator maps a raw value (text body, or an image/video locator) to a
//! [`Fingerprint`]. Generation is pure and deterministic: the same input
//! always yields the same fingerprint, and blank input yields the empty
//! fingerprint `{}`.
//!
//! The current generators digest the value with SHA-256 and keep the first
//! 16 hex characters under the `hash` key. For image and video this digests
//! the locator string, a stand-in for perceptual feature extraction.

use std::collections::BTreeMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::{Fingerprint, Modality};

/// Hex characters of the SHA-256 digest kept in a fingerprint.
pub const DIGEST_LEN: usize = 16;

/// Identity of the model behind a generator, recorded on every job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Explicit model selection per modality, resolved once by the caller.
///
/// Every modality defaults to its `Default <Modality> Model` at `1.0`;
/// `None` means no model identity is recorded for that generator.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_text_model")]
    pub text: Option<ModelInfo>,
    #[serde(default = "default_image_model")]
    pub image: Option<ModelInfo>,
    #[serde(default = "default_video_model")]
    pub video: Option<ModelInfo>,
}

fn default_text_model() -> Option<ModelInfo> {
    Some(ModelInfo::new("Default Text Model", default_version()))
}
fn default_image_model() -> Option<ModelInfo> {
    Some(ModelInfo::new("Default Image Model", default_version()))
}
fn default_video_model() -> Option<ModelInfo> {
    Some(ModelInfo::new("Default Video Model", default_version()))
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            text: default_text_model(),
            image: default_image_model(),
            video: default_video_model(),
        }
    }
}

/// A fingerprint generator for one modality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintGenerator {
    Text(Option<ModelInfo>),
    Image(Option<ModelInfo>),
    Video(Option<ModelInfo>),
}

impl FingerprintGenerator {
    pub fn for_modality(modality: Modality, model: Option<ModelInfo>) -> Self {
        match modality {
            Modality::Text => FingerprintGenerator::Text(model),
            Modality::Image => FingerprintGenerator::Image(model),
            Modality::Video => FingerprintGenerator::Video(model),
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            FingerprintGenerator::Text(_) => Modality::Text,
            FingerprintGenerator::Image(_) => Modality::Image,
            FingerprintGenerator::Video(_) => Modality::Video,
        }
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        match self {
            FingerprintGenerator::Text(m)
            | FingerprintGenerator::Image(m)
            | FingerprintGenerator::Video(m) => m.as_ref(),
        }
    }

    /// Fingerprint `value`; blank input gives the empty fingerprint.
    pub fn generate(&self, value: &str) -> Fingerprint {
        if value.trim().is_empty() {
            return Fingerprint::empty();
        }
        match self {
            FingerprintGenerator::Text(_) => Fingerprint::from_digest(short_digest(value)),
            // Locator digests until real visual/audio features land.
            FingerprintGenerator::Image(_) | FingerprintGenerator::Video(_) => {
                Fingerprint::from_digest(short_digest(value.trim()))
            }
        }
    }
}

/// First [`DIGEST_LEN`] hex characters of `sha256(value)`.
pub fn short_digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_LEN].to_string()
}

/// One generator per modality.
#[derive(Debug, Clone)]
pub struct Fingerprinters {
    text: FingerprintGenerator,
    image: FingerprintGenerator,
    video: FingerprintGenerator,
}

impl Fingerprinters {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            text: FingerprintGenerator::Text(config.text.clone()),
            image: FingerprintGenerator::Image(config.image.clone()),
            video: FingerprintGenerator::Video(config.video.clone()),
        }
    }

    pub fn get(&self, modality: Modality) -> &FingerprintGenerator {
        match modality {
            Modality::Text => &self.text,
            Modality::Image => &self.image,
            Modality::Video => &self.video,
        }
    }

    /// `modality -> "name@version"` for every generator with a model.
    pub fn model_versions(&self, modalities: &[Modality]) -> BTreeMap<String, String> {
        modalities
            .iter()
            .filter_map(|m| {
                self.get(*m)
                    .model()
                    .map(|info| (m.to_string(), format!("{}@{}", info.name, info.version)))
            })
            .collect()
    }
}

impl Default for Fingerprinters {
    fn default() -> Self {
        Self::new(&GeneratorConfig::default())
    }
}
