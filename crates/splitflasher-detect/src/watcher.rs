//! Mount root watcher
//!
//! Watches the mount root (non-recursively) and reports top-level entries
//! appearing and disappearing. An entry is only reported as added once it
//! has been quiet for the stability threshold, so a volume that is still
//! being mounted produces a single event.

use super::{DetectError, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default time an entry must stay unchanged before it is reported
pub const DEFAULT_STABILITY_MS: u64 = 500;

/// Default interval for checking whether pending entries have settled
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// A change under the mount root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
    /// A top-level entry appeared and is stable
    Added(PathBuf),

    /// A previously reported entry disappeared
    Removed(PathBuf),

    /// The underlying watcher reported a fault; watching continues
    Error(String),
}

/// Configuration for [`VolumeWatcher`]
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory to watch
    pub mount_root: PathBuf,

    /// How long an entry must be quiet before it is reported as added
    pub stability: Duration,

    /// How often pending entries are re-checked
    pub poll_interval: Duration,
}

impl WatchConfig {
    /// Create a config for `mount_root` with default timings
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            stability: Duration::from_millis(DEFAULT_STABILITY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Set the stability threshold
    #[must_use]
    pub fn stability(mut self, stability: Duration) -> Self {
        self.stability = stability;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Running watcher; stops when dropped
pub struct VolumeWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl VolumeWatcher {
    /// Start watching `config.mount_root`, delivering events to `handler`
    ///
    /// Entries already present when watching starts are not reported as
    /// added (scan them separately), but their removal is.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount root is missing or the platform
    /// watcher cannot be created.
    pub fn start<F>(config: WatchConfig, mut handler: F) -> Result<Self>
    where
        F: FnMut(MountEvent) + Send + 'static,
    {
        let root = config.mount_root.clone();
        if !root.is_dir() {
            return Err(DetectError::MountRootMissing(root.display().to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).map_err(|e| DetectError::Watcher(e.to_string()))?;
        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|e| DetectError::Watcher(e.to_string()))?;

        let mut tracker = SettleTracker::new(root.clone(), config.stability);
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_dir() {
                tracker.mark_present(path);
            }
        }

        let poll = config.poll_interval;
        let worker = std::thread::Builder::new()
            .name("volume-watcher".to_string())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(poll) {
                        Ok(Ok(event)) => {
                            for path in event.paths {
                                let Some(top) = top_level_entry(&root, &path) else {
                                    continue;
                                };
                                let exists = top.is_dir();
                                for ev in tracker.observe(top, exists, Instant::now()) {
                                    handler(ev);
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::error!("Volume watcher error: {}", e);
                            handler(MountEvent::Error(e.to_string()));
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    for ev in tracker.settle(Instant::now(), Path::is_dir) {
                        handler(ev);
                    }
                }
                tracing::debug!("Volume watcher stopped");
            })?;

        tracing::info!("Watching {:?} for bootloader volumes", config.mount_root);

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }
}

impl Drop for VolumeWatcher {
    fn drop(&mut self) {
        // Dropping the watcher closes the channel and ends the worker loop.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Map an event path to the mount-root entry it belongs to
pub(crate) fn top_level_entry(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    Some(root.join(first))
}

/// Coalesces raw watcher events into stable added/removed notifications
#[derive(Debug)]
pub(crate) struct SettleTracker {
    root: PathBuf,
    stability: Duration,
    settling: HashMap<PathBuf, Instant>,
    present: HashSet<PathBuf>,
}

impl SettleTracker {
    pub(crate) fn new(root: PathBuf, stability: Duration) -> Self {
        Self {
            root,
            stability,
            settling: HashMap::new(),
            present: HashSet::new(),
        }
    }

    pub(crate) fn mark_present(&mut self, path: PathBuf) {
        self.present.insert(path);
    }

    /// Record a raw event for a top-level entry
    pub(crate) fn observe(&mut self, path: PathBuf, exists: bool, now: Instant) -> Vec<MountEvent> {
        if path.parent() != Some(self.root.as_path()) {
            return Vec::new();
        }

        if exists {
            if !self.present.contains(&path) {
                self.settling.insert(path, now);
            }
            return Vec::new();
        }

        self.settling.remove(&path);
        if self.present.remove(&path) {
            vec![MountEvent::Removed(path)]
        } else {
            Vec::new()
        }
    }

    /// Report entries that have been quiet for the stability threshold
    pub(crate) fn settle<F>(&mut self, now: Instant, exists: F) -> Vec<MountEvent>
    where
        F: Fn(&Path) -> bool,
    {
        let ready: Vec<PathBuf> = self
            .settling
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= self.stability)
            .map(|(path, _)| path.clone())
            .collect();

        let mut events = Vec::new();
        for path in ready {
            self.settling.remove(&path);
            if exists(&path) {
                self.present.insert(path.clone());
                events.push(MountEvent::Added(path));
            }
        }
        events.sort_by(|a, b| match (a, b) {
            (MountEvent::Added(a), MountEvent::Added(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        });
        events
    }

    pub(crate) fn is_settling(&self, path: &Path) -> bool {
        self.settling.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STABILITY: Duration = Duration::from_millis(500);

    fn tracker() -> SettleTracker {
        SettleTracker::new(PathBuf::from("/Volumes"), STABILITY)
    }

    // -------------------------------------------------------------------------
    // top_level_entry tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_top_level_entry() {
        let root = Path::new("/Volumes");
        assert_eq!(
            top_level_entry(root, Path::new("/Volumes/NO NAME")),
            Some(PathBuf::from("/Volumes/NO NAME"))
        );
        assert_eq!(
            top_level_entry(root, Path::new("/Volumes/NO NAME/INFO_UF2.TXT")),
            Some(PathBuf::from("/Volumes/NO NAME"))
        );
        assert_eq!(top_level_entry(root, Path::new("/Volumes")), None);
        assert_eq!(top_level_entry(root, Path::new("/tmp/NO NAME")), None);
    }

    // -------------------------------------------------------------------------
    // SettleTracker tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_added_only_after_stability() {
        let mut t = tracker();
        let start = Instant::now();
        let path = PathBuf::from("/Volumes/NO NAME");

        assert!(t.observe(path.clone(), true, start).is_empty());
        assert!(t.settle(start + Duration::from_millis(100), |_| true).is_empty());
        assert!(t.is_settling(&path));

        let events = t.settle(start + STABILITY, |_| true);
        assert_eq!(events, vec![MountEvent::Added(path.clone())]);
        assert!(!t.is_settling(&path));
    }

    #[test]
    fn test_burst_of_events_coalesces() {
        let mut t = tracker();
        let start = Instant::now();
        let path = PathBuf::from("/Volumes/NO NAME");

        t.observe(path.clone(), true, start);
        t.observe(path.clone(), true, start + Duration::from_millis(300));
        assert!(t.settle(start + Duration::from_millis(600), |_| true).is_empty());

        let events = t.settle(start + Duration::from_millis(800), |_| true);
        assert_eq!(events, vec![MountEvent::Added(path.clone())]);

        // Already present: further events do not re-add.
        t.observe(path.clone(), true, start + Duration::from_millis(900));
        assert!(t.settle(start + Duration::from_secs(5), |_| true).is_empty());
    }

    #[test]
    fn test_removed_reported_once() {
        let mut t = tracker();
        let start = Instant::now();
        let path = PathBuf::from("/Volumes/NO NAME");

        t.observe(path.clone(), true, start);
        t.settle(start + STABILITY, |_| true);

        let events = t.observe(path.clone(), false, start + Duration::from_secs(1));
        assert_eq!(events, vec![MountEvent::Removed(path.clone())]);
        assert!(t.observe(path, false, start + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_unsettled_entry_vanishing_is_silent() {
        let mut t = tracker();
        let start = Instant::now();
        let path = PathBuf::from("/Volumes/NO NAME");

        t.observe(path.clone(), true, start);
        assert!(t.observe(path.clone(), false, start + Duration::from_millis(50)).is_empty());
        assert!(t.settle(start + Duration::from_secs(1), |_| true).is_empty());
    }

    #[test]
    fn test_entry_gone_at_settle_time_is_dropped() {
        let mut t = tracker();
        let start = Instant::now();
        let path = PathBuf::from("/Volumes/NO NAME");

        t.observe(path.clone(), true, start);
        assert!(t.settle(start + STABILITY, |_| false).is_empty());
        assert!(!t.is_settling(&path));
    }

    #[test]
    fn test_preexisting_entry_removal_is_reported() {
        let mut t = tracker();
        let path = PathBuf::from("/Volumes/BLEMICROPRO");
        t.mark_present(path.clone());

        let events = t.observe(path.clone(), false, Instant::now());
        assert_eq!(events, vec![MountEvent::Removed(path)]);
    }

    #[test]
    fn test_nested_paths_ignored() {
        let mut t = tracker();
        let events = t.observe(PathBuf::from("/Volumes/USB/NO NAME"), true, Instant::now());
        assert!(events.is_empty());
        assert!(!t.is_settling(Path::new("/Volumes/USB/NO NAME")));
    }

    // -------------------------------------------------------------------------
    // VolumeWatcher tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_start_requires_mount_root() {
        let result = VolumeWatcher::start(WatchConfig::new("/nonexistent/mount/root"), |_| {});
        assert!(matches!(result, Err(DetectError::MountRootMissing(_))));
    }

    #[test]
    fn test_watch_config_builder() {
        let config = WatchConfig::new("/Volumes")
            .stability(Duration::from_millis(50))
            .poll_interval(Duration::from_millis(10));
        assert_eq!(config.mount_root, PathBuf::from("/Volumes"));
        assert_eq!(config.stability, Duration::from_millis(50));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_watcher_reports_new_directory() {
        // Skip timing-sensitive tests in CI where thread scheduling is unpredictable
        if std::env::var("CI").is_ok() {
            return;
        }

        let root = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let config = WatchConfig::new(root.path())
            .stability(Duration::from_millis(50))
            .poll_interval(Duration::from_millis(10));

        let _watcher = VolumeWatcher::start(config, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

        let volume = root.path().join("NO NAME");
        std::fs::create_dir(&volume).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, MountEvent::Added(volume));
    }
}
