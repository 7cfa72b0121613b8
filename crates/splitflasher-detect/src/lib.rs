//! # SplitFlasher Detect
//!
//! Detection of UF2 bootloader volumes under a mount root.
//!
//! A bootloader always remounts under a predictable volume label (`NO NAME`,
//! `BLEMICROPRO`, ...), so a volume is a flash target when:
//! - its name is on the label allow-list
//! - it sits directly under the configured mount root (no nested lookalikes)
//! - it is not a symlink
//!
//! Labels are reused by every device, so the classifier also resolves a
//! stable device identifier through a platform tool (`diskutil` on macOS,
//! the mount table on Linux). The identifier is cached per mount path for
//! as long as the volume stays mounted.

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod watcher;

pub use watcher::{MountEvent, VolumeWatcher, WatchConfig};

/// Volume detection errors
#[derive(Error, Debug)]
pub enum DetectError {
    /// The mount root does not exist or is not a directory
    #[error("Mount root not available: {0}")]
    MountRootMissing(String),

    /// Command execution failed
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Failed to parse tool output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Filesystem watcher failure
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for volume detection operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// Volume labels UF2 bootloaders are known to mount under
pub const DEFAULT_TARGET_LABELS: &[&str] = &["NO NAME", "BLEMICROPRO"];

/// Default directory removable volumes are mounted under
#[must_use]
pub fn default_mount_root() -> PathBuf {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "macos")] {
            PathBuf::from("/Volumes")
        } else if #[cfg(target_os = "linux")] {
            match std::env::var("USER") {
                Ok(user) if !user.is_empty() => PathBuf::from("/media").join(user),
                _ => PathBuf::from("/media"),
            }
        } else {
            PathBuf::from("/Volumes")
        }
    }
}

/// Maps a mount path to a stable identifier of the underlying device.
///
/// Implementations may be slow (they usually spawn a tool) and may fail;
/// failures are reported as `None` so callers fall back to path identity.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceIdResolver: Send {
    /// Resolve the device identifier backing `mount_path`
    fn resolve(&self, mount_path: &Path) -> Option<String>;
}

/// Resolver for platforms without a device-identity tool
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl DeviceIdResolver for NullResolver {
    fn resolve(&self, _mount_path: &Path) -> Option<String> {
        None
    }
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::MountTableResolver;

        /// Device-identity resolver for the current platform
        #[must_use]
        pub fn default_resolver() -> Box<dyn DeviceIdResolver> {
            Box::new(MountTableResolver::new())
        }
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        pub use macos::DiskutilResolver;

        /// Device-identity resolver for the current platform
        #[must_use]
        pub fn default_resolver() -> Box<dyn DeviceIdResolver> {
            Box::new(DiskutilResolver)
        }
    } else {
        /// Device-identity resolver for the current platform
        #[must_use]
        pub fn default_resolver() -> Box<dyn DeviceIdResolver> {
            Box::new(NullResolver)
        }
    }
}

/// A target volume currently present under the mount root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetVolume {
    /// Mount path (e.g. `/Volumes/NO NAME`)
    pub path: PathBuf,

    /// Volume label (last path component)
    pub label: String,

    /// Underlying device identifier, if the platform tool could resolve it
    pub device_id: Option<String>,
}

/// Decides whether mount-root entries are flashable bootloader volumes
pub struct VolumeClassifier {
    mount_root: PathBuf,
    labels: Vec<String>,
    resolver: Box<dyn DeviceIdResolver>,
    device_ids: HashMap<PathBuf, String>,
}

impl VolumeClassifier {
    /// Create a classifier for `mount_root` accepting the given labels
    pub fn new(
        mount_root: impl Into<PathBuf>,
        labels: impl IntoIterator<Item = impl Into<String>>,
        resolver: Box<dyn DeviceIdResolver>,
    ) -> Self {
        Self {
            mount_root: mount_root.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            resolver,
            device_ids: HashMap::new(),
        }
    }

    /// Classifier for the platform mount root with the default labels
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            default_mount_root(),
            DEFAULT_TARGET_LABELS.iter().copied(),
            default_resolver(),
        )
    }

    /// The directory volumes are expected to appear in
    #[must_use]
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// The accepted volume labels
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Check whether `path` is a flashable target volume
    #[must_use]
    pub fn is_target(&self, path: &Path) -> bool {
        let Some(label) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        if !self.labels.iter().any(|l| l == label) {
            return false;
        }

        if path.parent() != Some(self.mount_root.as_path()) {
            tracing::debug!("{:?} has a target label but is not under {:?}", path, self.mount_root);
            return false;
        }

        // A vanished entry is still classified by name so removals match.
        let is_symlink = std::fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            tracing::debug!("Rejecting symlinked volume {:?}", path);
            return false;
        }

        true
    }

    /// Resolve the device identifier for a mounted volume
    ///
    /// A successful lookup is cached until [`forget`](Self::forget) is called
    /// for the path. Failed lookups are not cached.
    pub fn resolve_device_id(&mut self, path: &Path) -> Option<String> {
        if let Some(id) = self.device_ids.get(path) {
            return Some(id.clone());
        }

        let id = self.resolver.resolve(path)?;
        tracing::debug!("Resolved {:?} to device {}", path, id);
        self.device_ids.insert(path.to_path_buf(), id.clone());
        Some(id)
    }

    /// Cached device identifier, without consulting the platform tool
    #[must_use]
    pub fn cached_device_id(&self, path: &Path) -> Option<&str> {
        self.device_ids.get(path).map(String::as_str)
    }

    /// Drop the cached identifier of an unmounted volume
    ///
    /// A different physical disk may later reuse the same mount path.
    pub fn forget(&mut self, path: &Path) {
        self.device_ids.remove(path);
    }
}

impl std::fmt::Debug for VolumeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeClassifier")
            .field("mount_root", &self.mount_root)
            .field("labels", &self.labels)
            .field("device_ids", &self.device_ids)
            .finish_non_exhaustive()
    }
}

/// List the target volumes currently mounted under the classifier's root
///
/// # Errors
///
/// Returns an error if the mount root cannot be read.
pub fn list_target_volumes(classifier: &mut VolumeClassifier) -> Result<Vec<TargetVolume>> {
    let root = classifier.mount_root().to_path_buf();
    if !root.is_dir() {
        return Err(DetectError::MountRootMissing(root.display().to_string()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && classifier.is_target(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let device_id = classifier.resolve_device_id(&path);
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            TargetVolume {
                path,
                label,
                device_id,
            }
        })
        .collect())
}

/// Format bytes into human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn classifier(root: &Path, resolver: Box<dyn DeviceIdResolver>) -> VolumeClassifier {
        VolumeClassifier::new(root, DEFAULT_TARGET_LABELS.iter().copied(), resolver)
    }

    // -------------------------------------------------------------------------
    // is_target tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_target_accepts_allow_listed_labels() {
        let c = classifier(Path::new("/Volumes"), Box::new(NullResolver));
        assert!(c.is_target(Path::new("/Volumes/NO NAME")));
        assert!(c.is_target(Path::new("/Volumes/BLEMICROPRO")));
    }

    #[test]
    fn test_is_target_rejects_other_labels() {
        let c = classifier(Path::new("/Volumes"), Box::new(NullResolver));
        assert!(!c.is_target(Path::new("/Volumes/Untitled")));
        assert!(!c.is_target(Path::new("/Volumes/no name")));
        assert!(!c.is_target(Path::new("/Volumes")));
        assert!(!c.is_target(Path::new("/")));
    }

    #[test]
    fn test_is_target_rejects_nested_lookalikes() {
        let c = classifier(Path::new("/Volumes"), Box::new(NullResolver));
        assert!(!c.is_target(Path::new("/Volumes/USB/NO NAME")));
        assert!(!c.is_target(Path::new("/tmp/NO NAME")));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_target_rejects_symlinks() {
        let root = TempDir::new().unwrap();
        let real = TempDir::new().unwrap();
        std::os::unix::fs::symlink(real.path(), root.path().join("NO NAME")).unwrap();

        let c = classifier(root.path(), Box::new(NullResolver));
        assert!(!c.is_target(&root.path().join("NO NAME")));
    }

    #[test]
    fn test_custom_labels() {
        let c = VolumeClassifier::new("/mnt", ["RPI-RP2"], Box::new(NullResolver));
        assert!(c.is_target(Path::new("/mnt/RPI-RP2")));
        assert!(!c.is_target(Path::new("/mnt/NO NAME")));
        assert_eq!(c.labels(), &["RPI-RP2".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Device id resolution tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_device_id_is_cached() {
        let mut resolver = MockDeviceIdResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Some("disk4s1".to_string()));

        let mut c = classifier(Path::new("/Volumes"), Box::new(resolver));
        let path = Path::new("/Volumes/NO NAME");

        assert_eq!(c.resolve_device_id(path).as_deref(), Some("disk4s1"));
        assert_eq!(c.resolve_device_id(path).as_deref(), Some("disk4s1"));
        assert_eq!(c.cached_device_id(path), Some("disk4s1"));
    }

    #[test]
    fn test_resolve_failure_is_not_cached() {
        let mut resolver = MockDeviceIdResolver::new();
        resolver.expect_resolve().times(2).returning(|_| None);

        let mut c = classifier(Path::new("/Volumes"), Box::new(resolver));
        let path = Path::new("/Volumes/NO NAME");

        assert_eq!(c.resolve_device_id(path), None);
        assert_eq!(c.resolve_device_id(path), None);
        assert_eq!(c.cached_device_id(path), None);
    }

    #[test]
    fn test_forget_forces_new_lookup() {
        let mut resolver = MockDeviceIdResolver::new();
        let mut seq = mockall::Sequence::new();
        resolver
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Some("disk4s1".to_string()));
        resolver
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Some("disk6s1".to_string()));

        let mut c = classifier(Path::new("/Volumes"), Box::new(resolver));
        let path = Path::new("/Volumes/NO NAME");

        assert_eq!(c.resolve_device_id(path).as_deref(), Some("disk4s1"));
        c.forget(path);
        assert_eq!(c.resolve_device_id(path).as_deref(), Some("disk6s1"));
    }

    // -------------------------------------------------------------------------
    // list_target_volumes tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_list_target_volumes() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("NO NAME")).unwrap();
        std::fs::create_dir(root.path().join("Macintosh HD")).unwrap();
        std::fs::write(root.path().join("BLEMICROPRO"), b"not a dir").unwrap();

        let mut resolver = MockDeviceIdResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Some("disk9s1".to_string()));

        let mut c = classifier(root.path(), Box::new(resolver));
        let volumes = list_target_volumes(&mut c).unwrap();

        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].label, "NO NAME");
        assert_eq!(volumes[0].path, root.path().join("NO NAME"));
        assert_eq!(volumes[0].device_id.as_deref(), Some("disk9s1"));
    }

    #[test]
    fn test_list_target_volumes_missing_root() {
        let mut c = classifier(Path::new("/nonexistent/mount/root"), Box::new(NullResolver));
        let result = list_target_volumes(&mut c);
        assert!(matches!(result, Err(DetectError::MountRootMissing(_))));
    }

    #[test]
    fn test_target_volume_serialization() {
        let volume = TargetVolume {
            path: PathBuf::from("/Volumes/NO NAME"),
            label: "NO NAME".to_string(),
            device_id: None,
        };
        let json = serde_json::to_string(&volume).expect("Should serialize");
        assert!(json.contains("NO NAME"));
        let back: TargetVolume = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(back, volume);
    }

    // -------------------------------------------------------------------------
    // format_bytes tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(90_000), "87.9 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_error_display() {
        let err = DetectError::MountRootMissing("/Volumes".to_string());
        assert_eq!(err.to_string(), "Mount root not available: /Volumes");

        let err = DetectError::CommandFailed("diskutil".to_string());
        assert_eq!(err.to_string(), "Command failed: diskutil");
    }

    #[test]
    fn test_default_mount_root_is_absolute() {
        assert!(default_mount_root().is_absolute());
    }
}
