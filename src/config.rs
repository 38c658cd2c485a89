//! TOML configuration for `cguard`.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//! `load_config` parses and validates in one step so commands never see
//! an inconsistent configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use content_guard_core::fingerprint::GeneratorConfig;
use content_guard_core::job::JobDefaults;
use content_guard_core::models::Modality;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Model identity per fingerprint generator, recorded on every job.
    #[serde(default)]
    pub models: GeneratorConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,
    #[serde(default = "default_borderline_margin")]
    pub borderline_margin: f64,
    #[serde(default)]
    pub judge_borderline: bool,
    /// A `processing` job older than this may be reclaimed by another run.
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
            modalities: default_modalities(),
            borderline_margin: default_borderline_margin(),
            judge_borderline: false,
            stale_job_secs: default_stale_job_secs(),
        }
    }
}

fn default_threshold() -> f64 {
    0.8
}
fn default_modalities() -> Vec<Modality> {
    Modality::ALL.to_vec()
}
fn default_borderline_margin() -> f64 {
    0.1
}
fn default_stale_job_secs() -> u64 {
    900
}

impl DetectionConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_secs)
    }

    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            similarity_threshold: self.similarity_threshold,
            modalities: self.modalities.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JudgeConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub app_title: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            api_key_env: default_api_key_env(),
            referer: None,
            app_title: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    40
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    800
}

impl JudgeConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// A configuration with every default and the given database path.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            detection: DetectionConfig::default(),
            models: GeneratorConfig::default(),
            judge: JudgeConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Detection
    if !(0.0..=1.0).contains(&config.detection.similarity_threshold) {
        anyhow::bail!("detection.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.detection.borderline_margin) {
        anyhow::bail!("detection.borderline_margin must be in [0.0, 1.0]");
    }
    if config.detection.modalities.is_empty() {
        anyhow::bail!("detection.modalities must list at least one modality");
    }
    if config.detection.stale_job_secs == 0 {
        anyhow::bail!("detection.stale_job_secs must be > 0");
    }

    // Dispatch
    if config.dispatch.workers == 0 {
        anyhow::bail!("dispatch.workers must be >= 1");
    }
    if config.dispatch.max_attempts == 0 {
        anyhow::bail!("dispatch.max_attempts must be >= 1");
    }

    // Judge
    match config.judge.provider.as_str() {
        "disabled" => {}
        "openrouter" => {
            if config.judge.model.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!(
                    "judge.model must be specified when provider is '{}'",
                    config.judge.provider
                );
            }
            if config.judge.base_url.trim().is_empty() {
                anyhow::bail!(
                    "judge.base_url must be specified when provider is '{}'",
                    config.judge.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown judge provider: '{}'. Must be disabled or openrouter.",
            other
        ),
    }
    if config.judge.timeout_secs == 0 {
        anyhow::bail!("judge.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_guard_core::fingerprint::ModelInfo;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse("[db]\npath = \"./data/cguard.sqlite\"\n").unwrap();
        assert_eq!(cfg.detection.similarity_threshold, 0.8);
        assert_eq!(cfg.detection.modalities, Modality::ALL.to_vec());
        assert!(!cfg.detection.judge_borderline);
        assert!(!cfg.judge.is_enabled());
        assert_eq!(cfg.judge.timeout_secs, 40);
        assert_eq!(cfg.judge.max_retries, 3);
        assert_eq!(cfg.dispatch.workers, 4);
        assert_eq!(cfg.dispatch.retry_delay_secs, 60);
        assert_eq!(cfg.detection.stale_after(), Duration::from_secs(900));
        assert_eq!(
            cfg.models.text,
            Some(ModelInfo::new("Default Text Model", "1.0"))
        );
        assert_eq!(
            cfg.models.image,
            Some(ModelInfo::new("Default Image Model", "1.0"))
        );
        assert_eq!(
            cfg.models.video,
            Some(ModelInfo::new("Default Video Model", "1.0"))
        );
    }

    #[test]
    fn partial_models_table_keeps_other_defaults() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[models.text]\nname = \"Custom\"\nversion = \"3\"\n",
        )
        .unwrap();
        assert_eq!(cfg.models.text, Some(ModelInfo::new("Custom", "3")));
        assert_eq!(
            cfg.models.video,
            Some(ModelInfo::new("Default Video Model", "1.0"))
        );
    }

    #[test]
    fn full_config_parses() {
        let cfg = parse(
            r#"
            [db]
            path = "/tmp/cg.sqlite"

            [detection]
            similarity_threshold = 0.7
            modalities = ["text", "video"]
            judge_borderline = true

            [models.text]
            name = "Default Text Model"
            version = "2.1"

            [judge]
            provider = "openrouter"
            model = "openai/gpt-4o-mini"

            [dispatch]
            workers = 2

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detection.modalities, vec![Modality::Text, Modality::Video]);
        assert_eq!(
            cfg.models.text,
            Some(ModelInfo::new("Default Text Model", "2.1"))
        );
        assert!(cfg.judge.is_enabled());
        assert_eq!(cfg.logging.level.as_deref(), Some("debug"));
        assert!(cfg.logging.json);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = parse("[db]\npath = \"x\"\n[detection]\nsimilarity_threshold = 1.2\n").unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn rejects_unknown_modality() {
        assert!(parse("[db]\npath = \"x\"\n[detection]\nmodalities = [\"audio\"]\n").is_err());
    }

    #[test]
    fn openrouter_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[judge]\nprovider = \"openrouter\"\n").unwrap_err();
        assert!(err.to_string().contains("judge.model"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[judge]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown judge provider"));
    }

    #[test]
    fn rejects_zero_stale_window() {
        let err = parse("[db]\npath = \"x\"\n[detection]\nstale_job_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("stale_job_secs"));
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(parse("[db]\npath = \"x\"\n[dispatch]\nworkers = 0\n").is_err());
    }
}
