//! Persistent user settings for SplitFlasher
//!
//! Settings are stored in a TOML configuration file at:
//! - Linux: `~/.config/splitflasher/splitflasher_config.toml`
//! - macOS: `~/Library/Application Support/splitflasher/splitflasher_config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [volumes]
//! mount_root = "/Volumes"
//! labels = ["NO NAME", "BLEMICROPRO"]
//!
//! [copy]
//! chunk_size = "64K"
//! max_attempts = 3
//! retry_delay_ms = 400
//!
//! [session]
//! ignore_window_ms = 10000
//! stability_ms = 500
//! log_file = "/tmp/splitflasher.log"
//! ```

use crate::config::{Config, DEFAULT_IGNORE_WINDOW_MS};
use crate::copier::{CopyConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use serde::{Deserialize, Serialize};
use splitflasher_detect::{DEFAULT_TARGET_LABELS, watcher::DEFAULT_STABILITY_MS};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "splitflasher_config.toml";

/// Application name for config directory
const APP_NAME: &str = "splitflasher";

/// Default chunk size string
const DEFAULT_CHUNK_SIZE_STR: &str = "64K";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Volume detection settings
    pub volumes: VolumeSettings,

    /// Copy engine settings
    pub copy: CopySettings,

    /// Session behaviour settings
    pub session: SessionSettings,
}

/// Settings for volume detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeSettings {
    /// Directory volumes are mounted under (platform default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_root: Option<PathBuf>,

    /// Volume labels accepted as flash targets
    pub labels: Vec<String>,
}

/// Settings for the copy engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CopySettings {
    /// Chunk size (e.g., "64K", "1M")
    pub chunk_size: String,

    /// Attempts per copy, including the first
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
}

/// Settings for a flashing session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Remount suppression window in milliseconds (0 disables it)
    pub ignore_window_ms: u64,

    /// Quiet period before a new mount is reported, in milliseconds
    pub stability_ms: u64,

    /// Append log output to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            mount_root: None,
            labels: DEFAULT_TARGET_LABELS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_STR.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ignore_window_ms: DEFAULT_IGNORE_WINDOW_MS,
            stability_ms: DEFAULT_STABILITY_MS,
            log_file: None,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Generate a default configuration file content as a string
    pub fn default_config_string() -> String {
        let default = Self::default();
        toml::to_string_pretty(&default)
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }

    /// Build the runtime configuration these settings describe
    pub fn to_config(&self) -> Result<Config, SettingsError> {
        let chunk_size = parse_size(&self.copy.chunk_size)?;
        let chunk_size = usize::try_from(chunk_size)
            .map_err(|_| SettingsError::InvalidValue(format!("chunk_size {}", self.copy.chunk_size)))?;

        if self.copy.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.volumes.labels.is_empty() {
            return Err(SettingsError::InvalidValue(
                "at least one volume label is required".to_string(),
            ));
        }

        let copy = CopyConfig::new()
            .chunk_size(chunk_size)
            .max_attempts(self.copy.max_attempts)
            .retry_delay(Duration::from_millis(self.copy.retry_delay_ms));

        let mut config = Config::new()
            .labels(self.volumes.labels.iter().cloned())
            .ignore_window(Duration::from_millis(self.session.ignore_window_ms))
            .stability(Duration::from_millis(self.session.stability_ms))
            .copy(copy);

        if let Some(root) = &self.volumes.mount_root {
            config = config.mount_root(root);
        }

        Ok(config)
    }
}

/// Parse a size string like "64K", "1M" into bytes
pub fn parse_size(s: &str) -> Result<u64, SettingsError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SettingsError::InvalidValue("empty size".to_string()));
    }

    let split_pos = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map_or(s.len(), |(i, _)| i);
    let (num_str, suffix) = s.split_at(split_pos);

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue(format!("size {s}")))?;

    let multiplier = match suffix.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        _ => return Err(SettingsError::InvalidValue(format!("size {s}"))),
    };

    let result = num
        .checked_mul(multiplier)
        .ok_or_else(|| SettingsError::InvalidValue(format!("size {s} is too large")))?;

    if result == 0 {
        return Err(SettingsError::InvalidValue("size must not be zero".to_string()));
    }

    Ok(result)
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// Failed to deserialize settings
    #[error("Failed to parse settings: {0}")]
    Deserialize(toml::de::Error),

    /// A setting has a value that cannot be used
    #[error("Invalid setting: {0}")]
    InvalidValue(String),
}
