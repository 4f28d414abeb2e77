// src/config/mod.rs - Configuration loading, environment overrides and validation

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

use crate::classifier::Truncation;

pub const CONFIG_FILE_NAME: &str = "bot.yaml";

/// Environment variables that take precedence over `bot.yaml`
pub const ENV_MODEL_DIR: &str = "MODEL_DIR";
pub const ENV_THRESHOLD: &str = "MODERATION_THRESHOLD";
pub const ENV_API_BASE: &str = "TELEGRAM_API_BASE";
pub const ENV_POLL_TIMEOUT: &str = "TELEGRAM_POLL_TIMEOUT";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("moderation threshold must lie in [0, 1], got {0}")]
    ThresholdOutOfRange(f32),

    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },

    #[error("invalid value '{value}' for {variable}")]
    InvalidOverride { variable: &'static str, value: String },

    #[error("invalid Telegram API base url '{0}'")]
    InvalidApiBase(String),
}

/// Bot configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub version: String,
    pub description: String,
    pub last_updated: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub core: CoreBotSettings,

    #[serde(default)]
    pub telegram: TelegramSettings,

    /// Model Store layout
    #[serde(default)]
    pub model: ModelSettings,

    #[serde(default)]
    pub moderation: ModerationSettings,

    #[serde(default)]
    pub performance: PerformanceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreBotSettings {
    pub bot_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub api_base: String,
    /// Long-poll timeout passed to getUpdates
    pub poll_timeout_seconds: u64,
    /// Discard updates queued while the bot was offline
    pub drop_pending_updates: bool,
    /// Capacity of the gateway -> dispatcher channel
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model_dir: PathBuf,
    pub config_file: String,
    pub weights_file: String,
    pub vocabulary_file: String,
    /// Root words (kata dasar) for the stemmer; required, startup fails without it
    pub root_dictionary_file: String,
    /// Replaces the built-in Indonesian stopword list when set
    pub stopwords_file: Option<String>,
    pub truncation: Truncation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    /// Scores strictly above this are suppressed
    pub threshold: f32,
    pub notify_on_delete: bool,
    pub parse_mode: Option<String>,
    /// `{prob}` is replaced by the score with two decimals
    pub deleted_notice: String,
    pub permission_warning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// 1 processes messages strictly one after another
    pub max_concurrent_messages: usize,
    pub shutdown_timeout_seconds: u64,
    /// 0 disables the periodic statistics log
    pub stats_interval_seconds: u64,
}

impl Default for CoreBotSettings {
    fn default() -> Self {
        Self {
            bot_name: "JudiGuard".to_string(),
        }
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_seconds: 30,
            drop_pending_updates: false,
            channel_capacity: 256,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("model"),
            config_file: "model.json".to_string(),
            weights_file: "model.safetensors".to_string(),
            vocabulary_file: "vocabulary.json".to_string(),
            root_dictionary_file: "kata-dasar.txt".to_string(),
            stopwords_file: None,
            truncation: Truncation::Pre,
        }
    }
}

impl ModelSettings {
    pub fn config_path(&self) -> PathBuf {
        self.model_dir.join(&self.config_file)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.model_dir.join(&self.weights_file)
    }

    pub fn vocabulary_path(&self) -> PathBuf {
        self.model_dir.join(&self.vocabulary_file)
    }

    pub fn root_dictionary_path(&self) -> PathBuf {
        self.model_dir.join(&self.root_dictionary_file)
    }

    pub fn stopwords_path(&self) -> Option<PathBuf> {
        self.stopwords_file.as_ref().map(|f| self.model_dir.join(f))
    }
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            notify_on_delete: true,
            parse_mode: Some("Markdown".to_string()),
            deleted_notice: "⚠️ *Pesan terdeteksi sebagai spam judi online dan telah dihapus.* (Prob: {prob})"
                .to_string(),
            permission_warning: "⚠️ *Peringatan!* Terdeteksi promosi judi online. (Prob: {prob})\n\n_Bot tidak memiliki hak admin untuk menghapus pesan._"
                .to_string(),
        }
    }
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_messages: 16,
            shutdown_timeout_seconds: 30,
            stats_interval_seconds: 300,
        }
    }
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "JudiGuard online-gambling spam moderation".to_string(),
            last_updated: chrono::Utc::now(),
            core: CoreBotSettings::default(),
            telegram: TelegramSettings::default(),
            model: ModelSettings::default(),
            moderation: ModerationSettings::default(),
            performance: PerformanceSettings::default(),
        }
    }
}

impl BotConfiguration {
    /// Apply overrides from any variable source; the process environment in production
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<Vec<&'static str>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(dir) = lookup(ENV_MODEL_DIR) {
            self.model.model_dir = PathBuf::from(dir);
            applied.push(ENV_MODEL_DIR);
        }

        if let Some(value) = lookup(ENV_THRESHOLD) {
            self.moderation.threshold = value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                variable: ENV_THRESHOLD,
                value: value.clone(),
            })?;
            applied.push(ENV_THRESHOLD);
        }

        if let Some(base) = lookup(ENV_API_BASE) {
            self.telegram.api_base = base;
            applied.push(ENV_API_BASE);
        }

        if let Some(value) = lookup(ENV_POLL_TIMEOUT) {
            self.telegram.poll_timeout_seconds =
                value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                    variable: ENV_POLL_TIMEOUT,
                    value: value.clone(),
                })?;
            applied.push(ENV_POLL_TIMEOUT);
        }

        Ok(applied)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let threshold = self.moderation.threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            report.errors.push(ConfigError::ThresholdOutOfRange(threshold));
        }

        let positives = [
            ("performance.max_concurrent_messages", self.performance.max_concurrent_messages as u64),
            ("telegram.channel_capacity", self.telegram.channel_capacity as u64),
        ];
        for (name, value) in positives {
            if value == 0 {
                report.errors.push(ConfigError::NotPositive { name });
            }
        }

        if url::Url::parse(&self.telegram.api_base).is_err() {
            report
                .errors
                .push(ConfigError::InvalidApiBase(self.telegram.api_base.clone()));
        }

        if self.telegram.poll_timeout_seconds == 0 {
            report
                .warnings
                .push("telegram.poll_timeout_seconds is 0, getUpdates will short-poll".to_string());
        }
        if self.performance.shutdown_timeout_seconds == 0 {
            report
                .warnings
                .push("performance.shutdown_timeout_seconds is 0, in-flight messages are abandoned on shutdown".to_string());
        }
        if !self.moderation.deleted_notice.contains("{prob}")
            || !self.moderation.permission_warning.contains("{prob}")
        {
            report
                .warnings
                .push("moderation templates without {prob} will not show the score".to_string());
        }

        report
    }
}

/// Validation report
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns `config/bot.yaml`: creates it with defaults on first run and hands
/// out the effective configuration after environment overrides.
#[derive(Clone)]
pub struct ConfigurationManager {
    config_dir: PathBuf,
    bot_config: Arc<RwLock<BotConfiguration>>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Load the file (creating it when missing), then apply the process environment
    pub async fn initialize(&self) -> Result<()> {
        self.initialize_with(|name| std::env::var(name).ok()).await
    }

    pub async fn initialize_with<F>(&self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir)
                .await
                .with_context(|| format!("Failed to create {}", self.config_dir.display()))?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let config_path = self.config_path();
        let mut config = if config_path.exists() {
            self.load_bot_config(&config_path).await?
        } else {
            self.create_default_bot_config(&config_path).await?
        };

        let applied = config.apply_overrides(lookup)?;
        if !applied.is_empty() {
            info!("Environment overrides applied: {}", applied.join(", "));
        }

        let report = config.validate();
        for warning in &report.warnings {
            warn!("Configuration warning: {}", warning);
        }
        if let Some(first) = report.errors.first() {
            return Err(anyhow::anyhow!(
                "Invalid configuration in {} ({} error(s)): {}",
                config_path.display(),
                report.errors.len(),
                first
            ));
        }

        *self.bot_config.write().await = config;
        info!("Configuration manager initialized successfully");
        Ok(())
    }

    async fn load_bot_config(&self, config_path: &Path) -> Result<BotConfiguration> {
        let content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: BotConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        debug!("Loaded bot configuration from {}", config_path.display());
        Ok(config)
    }

    async fn create_default_bot_config(&self, config_path: &Path) -> Result<BotConfiguration> {
        let config = BotConfiguration::default();
        let yaml = serde_yaml::to_string(&config)?;
        fs::write(config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        info!("Created default bot configuration: {}", config_path.display());
        Ok(config)
    }

    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn test_default_file_created_on_first_run() {
        let temp_dir = tempdir().unwrap();
        let manager = ConfigurationManager::new(temp_dir.path().join("config"));

        manager.initialize_with(no_env).await.unwrap();
        assert!(manager.config_path().exists());

        let config = manager.get_bot_config().await;
        assert_eq!(config.moderation.threshold, 0.5);
        assert!(config.moderation.notify_on_delete);
        assert_eq!(config.model.truncation, Truncation::Pre);
        assert_eq!(config.model.vocabulary_path(), PathBuf::from("model/vocabulary.json"));
    }

    #[tokio::test]
    async fn test_existing_file_is_loaded() {
        let temp_dir = tempdir().unwrap();
        let yaml = r#"
version: "1.0"
description: test
last_updated: "2024-01-01T00:00:00Z"
moderation:
  threshold: 0.8
  notify_on_delete: false
model:
  model_dir: /srv/judi
  truncation: post
"#;
        std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), yaml).unwrap();

        let manager = ConfigurationManager::new(temp_dir.path());
        manager.initialize_with(no_env).await.unwrap();

        let config = manager.get_bot_config().await;
        assert_eq!(config.moderation.threshold, 0.8);
        assert!(!config.moderation.notify_on_delete);
        assert_eq!(config.model.truncation, Truncation::Post);
        assert_eq!(config.model.weights_path(), PathBuf::from("/srv/judi/model.safetensors"));
        assert_eq!(config.telegram.poll_timeout_seconds, 30);
        assert!(config.moderation.deleted_notice.contains("{prob}"));
    }

    #[tokio::test]
    async fn test_environment_overrides() {
        let temp_dir = tempdir().unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_THRESHOLD, "0.65"),
            (ENV_MODEL_DIR, "/opt/model"),
            (ENV_POLL_TIMEOUT, "10"),
        ]
        .into_iter()
        .collect();

        let manager = ConfigurationManager::new(temp_dir.path());
        manager
            .initialize_with(|name| env.get(name).map(|v| v.to_string()))
            .await
            .unwrap();

        let config = manager.get_bot_config().await;
        assert_eq!(config.moderation.threshold, 0.65);
        assert_eq!(config.model.model_dir, PathBuf::from("/opt/model"));
        assert_eq!(config.telegram.poll_timeout_seconds, 10);
    }

    #[test]
    fn test_unparseable_override_is_an_error() {
        let mut config = BotConfiguration::default();
        let result = config.apply_overrides(|name| (name == ENV_THRESHOLD).then(|| "high".to_string()));
        assert_eq!(
            result,
            Err(ConfigError::InvalidOverride {
                variable: ENV_THRESHOLD,
                value: "high".to_string()
            })
        );
    }

    #[test]
    fn test_validation() {
        assert!(BotConfiguration::default().validate().is_valid());

        let mut config = BotConfiguration::default();
        config.moderation.threshold = 1.5;
        config.performance.max_concurrent_messages = 0;
        config.telegram.api_base = "not a url".to_string();
        let report = config.validate();
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors.contains(&ConfigError::ThresholdOutOfRange(1.5)));
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let mut config = BotConfiguration::default();
        config.moderation.threshold = 0.0;
        assert!(config.validate().is_valid());
        config.moderation.threshold = 1.0;
        assert!(config.validate().is_valid());
        config.moderation.threshold = f32::NAN;
        assert!(!config.validate().is_valid());
    }

    #[tokio::test]
    async fn test_invalid_file_fails_initialization() {
        let temp_dir = tempdir().unwrap();
        let yaml = "version: \"1.0\"\ndescription: x\nlast_updated: \"2024-01-01T00:00:00Z\"\nmoderation:\n  threshold: 2.0\n";
        std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), yaml).unwrap();

        let manager = ConfigurationManager::new(temp_dir.path());
        assert!(manager.initialize_with(no_env).await.is_err());
    }
}
