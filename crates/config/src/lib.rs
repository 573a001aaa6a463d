//! Configuration loading, validation, and management for copanel.
//!
//! Loads configuration from `~/.copanel/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use copanel_core::backend::ReplyType;
use copanel_core::feature::{FeatureId, FeatureTable, TextDirection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.copanel/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Assistant backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Panel transitions and layout
    #[serde(default)]
    pub panels: PanelsConfig,

    /// Session identity and persistence
    #[serde(default)]
    pub session: SessionConfig,

    /// Historical pattern matcher tuning
    #[serde(default)]
    pub matcher: MatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub reply_type: ReplyType,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000/api".into()
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            reply_type: ReplyType::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelsConfig {
    /// Delay between a navigation and the new feature's panel opening
    #[serde(default = "default_transition_ms")]
    pub transition_ms: u64,

    #[serde(default)]
    pub direction: TextDirection,

    /// Per-feature overrides, keyed by feature name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, FeatureOverride>,
}

fn default_transition_ms() -> u64 {
    300
}

impl Default for PanelsConfig {
    fn default() -> Self {
        Self {
            transition_ms: default_transition_ms(),
            direction: TextDirection::default(),
            features: BTreeMap::new(),
        }
    }
}

impl PanelsConfig {
    pub fn transition_duration(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

/// Overrides for one entry of the feature table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_size: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Persist the current session id across restarts
    #[serde(default)]
    pub persist: bool,

    /// Where the file store keeps session ids (defaults under the config dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl SessionConfig {
    /// The resolved session store path.
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,

    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,

    #[serde(default = "default_positional_bonus")]
    pub positional_bonus: f64,
}

fn default_max_suggestions() -> usize {
    5
}
fn default_similarity_weight() -> f64 {
    0.6
}
fn default_frequency_weight() -> f64 {
    0.4
}
fn default_positional_bonus() -> f64 {
    0.1
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_suggestions: default_max_suggestions(),
            similarity_weight: default_similarity_weight(),
            frequency_weight: default_frequency_weight(),
            positional_bonus: default_positional_bonus(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.copanel/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `COPANEL_BACKEND_URL`
    /// - `COPANEL_USER_ID`
    /// - `COPANEL_SUBJECT_ID`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(url) = std::env::var("COPANEL_BACKEND_URL") {
            config.backend.base_url = url;
        }
        if let Ok(user) = std::env::var("COPANEL_USER_ID") {
            config.session.user_id = Some(user);
        }
        if let Ok(subject) = std::env::var("COPANEL_SUBJECT_ID") {
            config.session.subject_id = Some(subject);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".copanel")
    }

    /// The feature table with configured overrides applied.
    ///
    /// Override entries naming an unknown feature are logged and skipped.
    pub fn feature_table(&self) -> FeatureTable {
        let mut table = FeatureTable::default();
        for (name, over) in &self.panels.features {
            let Ok(id) = name.parse::<FeatureId>() else {
                tracing::warn!(feature = %name, "Ignoring override for unknown feature");
                continue;
            };
            let Some(feature) = table.get_mut(id) else {
                continue;
            };
            if let Some(prefix) = &over.path_prefix {
                feature.path_prefix = prefix.clone();
            }
            if let Some(size) = over.default_size {
                feature.default_size = size;
            }
            if let Some(size) = over.min_size {
                feature.min_size = size;
            }
            if let Some(size) = over.max_size {
                feature.max_size = size;
            }
        }
        table
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.base_url must not be empty".into(),
            ));
        }

        let m = &self.matcher;
        if m.max_suggestions == 0 {
            return Err(ConfigError::ValidationError(
                "matcher.max_suggestions must be > 0".into(),
            ));
        }
        for (name, weight) in [
            ("similarity_weight", m.similarity_weight),
            ("frequency_weight", m.frequency_weight),
            ("positional_bonus", m.positional_bonus),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::ValidationError(format!(
                    "matcher.{name} must be between 0.0 and 1.0"
                )));
            }
        }

        for feature in self.feature_table().iter() {
            if feature.min_size > feature.default_size || feature.default_size > feature.max_size {
                return Err(ConfigError::ValidationError(format!(
                    "panel sizes for '{}' must satisfy min <= default <= max",
                    feature.feature_id
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
