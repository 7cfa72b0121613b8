//! Configuration for SplitFlasher sessions

use crate::copier::CopyConfig;
use splitflasher_detect::{DEFAULT_TARGET_LABELS, default_mount_root, watcher};
use std::path::PathBuf;
use std::time::Duration;

/// Default remount suppression window (10 s)
pub const DEFAULT_IGNORE_WINDOW_MS: u64 = 10_000;

/// Extension of flashable image files
pub const DEFAULT_IMAGE_EXTENSION: &str = "uf2";

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory bootloader volumes are mounted under
    pub mount_root: PathBuf,

    /// Volume labels accepted as flash targets
    pub labels: Vec<String>,

    /// How long a freshly flashed device is ignored when it remounts.
    /// Zero disables suppression.
    pub ignore_window: Duration,

    /// Copy engine settings
    pub copy: CopyConfig,

    /// Extension of image files collected from an archive
    pub image_extension: String,

    /// How long a new mount must be quiet before it is reported
    pub stability: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            labels: DEFAULT_TARGET_LABELS.iter().map(ToString::to_string).collect(),
            ignore_window: Duration::from_millis(DEFAULT_IGNORE_WINDOW_MS),
            copy: CopyConfig::default(),
            image_extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            stability: Duration::from_millis(watcher::DEFAULT_STABILITY_MS),
        }
    }
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mount root
    pub fn mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }

    /// Replace the accepted volume labels
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the remount suppression window
    pub fn ignore_window(mut self, window: Duration) -> Self {
        self.ignore_window = window;
        self
    }

    /// Set the copy engine settings
    pub fn copy(mut self, copy: CopyConfig) -> Self {
        self.copy = copy;
        self
    }

    /// Set the image file extension (without the dot)
    pub fn image_extension(mut self, ext: impl Into<String>) -> Self {
        self.image_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    /// Set the mount stability threshold
    pub fn stability(mut self, stability: Duration) -> Self {
        self.stability = stability;
        self
    }

    /// Watcher configuration for this session
    pub fn watch_config(&self) -> watcher::WatchConfig {
        watcher::WatchConfig::new(&self.mount_root).stability(self.stability)
    }
}
