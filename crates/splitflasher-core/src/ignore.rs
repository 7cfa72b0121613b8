//! Remount suppression
//!
//! A bootloader that has just been flashed usually reboots and remounts
//! under the same label and path. Entries in the registry mark such
//! volumes for a short window so the echo is not taken for a new device.
//!
//! Expiry is an explicit deadline checked on every lookup. The owner also
//! calls [`IgnoreRegistry::purge_expired`] when [`IgnoreRegistry::next_expiry`]
//! passes, so stale entries do not linger.

use crate::slot::Slot;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Identity of a suppressed volume
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IgnoreKey {
    /// Stable device identifier
    Device(String),
    /// Mount path, when no identifier could be resolved
    Path(PathBuf),
}

impl IgnoreKey {
    /// Key for a volume: its device identifier when known, else its path
    pub fn for_volume(path: &Path, device_id: Option<&str>) -> Self {
        match device_id {
            Some(id) => IgnoreKey::Device(id.to_string()),
            None => IgnoreKey::Path(path.to_path_buf()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IgnoreEntry {
    slot: Slot,
    expires_at: Instant,
}

/// Time-bounded set of recently flashed volumes
#[derive(Debug)]
pub struct IgnoreRegistry {
    window: Duration,
    entries: HashMap<IgnoreKey, IgnoreEntry>,
}

impl IgnoreRegistry {
    /// Create a registry whose entries live for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Suppression window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Suppress `key` for the window, replacing any previous deadline
    pub fn arm(&mut self, key: IgnoreKey, slot: Slot) {
        self.arm_at(key, slot, Instant::now());
    }

    /// [`arm`](Self::arm) with an explicit clock
    pub fn arm_at(&mut self, key: IgnoreKey, slot: Slot, now: Instant) {
        if self.window.is_zero() {
            self.entries.remove(&key);
            return;
        }
        tracing::debug!("Suppressing remounts of {:?} ({}) for {:?}", key, slot, self.window);
        self.entries.insert(
            key,
            IgnoreEntry {
                slot,
                expires_at: now + self.window,
            },
        );
    }

    /// Slot a live entry for `key` was armed with
    pub fn lookup(&mut self, key: &IgnoreKey) -> Option<Slot> {
        self.lookup_at(key, Instant::now())
    }

    /// [`lookup`](Self::lookup) with an explicit clock; evicts an expired entry
    pub fn lookup_at(&mut self, key: &IgnoreKey, now: Instant) -> Option<Slot> {
        let entry = self.entries.get(key)?;
        if now > entry.expires_at {
            self.entries.remove(key);
            return None;
        }
        Some(entry.slot)
    }

    /// Drop every entry whose deadline has passed, returning how many
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.expires_at);
        before - self.entries.len()
    }

    /// Earliest deadline among live entries
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.expires_at).min()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(10_000);

    fn device(id: &str) -> IgnoreKey {
        IgnoreKey::Device(id.to_string())
    }

    // -------------------------------------------------------------------------
    // IgnoreKey tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_key_prefers_device_id() {
        let path = Path::new("/Volumes/NO NAME");
        assert_eq!(IgnoreKey::for_volume(path, Some("disk4s1")), device("disk4s1"));
        assert_eq!(
            IgnoreKey::for_volume(path, None),
            IgnoreKey::Path(path.to_path_buf())
        );
    }

    // -------------------------------------------------------------------------
    // Registry tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_lookup_within_window() {
        let mut registry = IgnoreRegistry::new(WINDOW);
        let start = Instant::now();
        registry.arm_at(device("disk4s1"), Slot::Right, start);

        assert_eq!(
            registry.lookup_at(&device("disk4s1"), start + Duration::from_secs(2)),
            Some(Slot::Right)
        );
        assert_eq!(registry.lookup_at(&device("disk5s1"), start), None);
    }

    #[test]
    fn test_lookup_evicts_expired() {
        let mut registry = IgnoreRegistry::new(WINDOW);
        let start = Instant::now();
        registry.arm_at(device("disk4s1"), Slot::Right, start);

        assert_eq!(
            registry.lookup_at(&device("disk4s1"), start + WINDOW + Duration::from_millis(1)),
            None
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut registry = IgnoreRegistry::new(WINDOW);
        let start = Instant::now();
        registry.arm_at(device("disk4s1"), Slot::Right, start);
        registry.arm_at(device("disk4s1"), Slot::Left, start + Duration::from_secs(8));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.next_expiry(), Some(start + Duration::from_secs(18)));
        assert_eq!(
            registry.lookup_at(&device("disk4s1"), start + Duration::from_secs(15)),
            Some(Slot::Left)
        );
    }

    #[test]
    fn test_purge_expired() {
        let mut registry = IgnoreRegistry::new(WINDOW);
        let start = Instant::now();
        registry.arm_at(device("disk4s1"), Slot::Right, start);
        registry.arm_at(
            IgnoreKey::Path(PathBuf::from("/Volumes/NO NAME")),
            Slot::Left,
            start + Duration::from_secs(5),
        );

        assert_eq!(registry.next_expiry(), Some(start + WINDOW));
        assert_eq!(registry.purge_expired(start + Duration::from_secs(11)), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.next_expiry(), Some(start + Duration::from_secs(15)));
        assert_eq!(registry.purge_expired(start + Duration::from_secs(16)), 1);
        assert_eq!(registry.next_expiry(), None);
    }

    #[test]
    fn test_clear() {
        let mut registry = IgnoreRegistry::new(WINDOW);
        registry.arm(device("disk4s1"), Slot::Right);
        registry.arm(device("disk5s1"), Slot::Left);
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.lookup(&device("disk4s1")), None);
    }

    #[test]
    fn test_zero_window_disables_suppression() {
        let mut registry = IgnoreRegistry::new(Duration::ZERO);
        registry.arm(device("disk4s1"), Slot::Right);
        assert!(registry.is_empty());
        assert_eq!(registry.lookup(&device("disk4s1")), None);
    }
}
