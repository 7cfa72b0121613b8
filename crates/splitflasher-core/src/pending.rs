//! Volumes waiting for a slot

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// FIFO of mount paths that arrived before they could be used
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    paths: VecDeque<PathBuf>,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `path` unless it is already queued; returns whether it was added
    pub fn push(&mut self, path: &Path) -> bool {
        if self.contains(path) {
            return false;
        }
        self.paths.push_back(path.to_path_buf());
        true
    }

    /// Whether `path` is queued
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Remove `path` wherever it sits in the queue
    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Empty the queue, returning its contents in order
    pub fn take_all(&mut self) -> Vec<PathBuf> {
        self.paths.drain(..).collect()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Number of queued paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Queued paths, front first
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// Take the first usable volume
    ///
    /// Every entry is looked at no more than once. Entries that are no
    /// longer mounted are dropped; suppressed entries go back to the tail
    /// since their window may still lapse.
    pub fn next_eligible<K, I>(&mut self, mut is_known: K, mut is_ignored: I) -> Option<PathBuf>
    where
        K: FnMut(&Path) -> bool,
        I: FnMut(&Path) -> bool,
    {
        for _ in 0..self.paths.len() {
            let Some(path) = self.paths.pop_front() else {
                break;
            };
            if !is_known(&path) {
                tracing::debug!("Dropping pending volume {:?}: no longer mounted", path);
                continue;
            }
            if is_ignored(&path) {
                self.paths.push_back(path);
                continue;
            }
            return Some(path);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(paths: &[&str]) -> PendingQueue {
        let mut q = PendingQueue::new();
        for p in paths {
            q.push(Path::new(p));
        }
        q
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut q = PendingQueue::new();
        assert!(q.push(Path::new("/Volumes/NO NAME")));
        assert!(!q.push(Path::new("/Volumes/NO NAME")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_remove_and_take_all() {
        let mut q = queue(&["/Volumes/A", "/Volumes/B", "/Volumes/C"]);
        q.remove(Path::new("/Volumes/B"));
        assert_eq!(
            q.take_all(),
            vec![PathBuf::from("/Volumes/A"), PathBuf::from("/Volumes/C")]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_next_eligible_fifo() {
        let mut q = queue(&["/Volumes/A", "/Volumes/B"]);
        let next = q.next_eligible(|_| true, |_| false);
        assert_eq!(next, Some(PathBuf::from("/Volumes/A")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_next_eligible_drops_unknown() {
        let mut q = queue(&["/Volumes/A", "/Volumes/B"]);
        let next = q.next_eligible(|p| p != Path::new("/Volumes/A"), |_| false);
        assert_eq!(next, Some(PathBuf::from("/Volumes/B")));
        assert!(q.is_empty());
    }

    #[test]
    fn test_next_eligible_requeues_ignored() {
        let mut q = queue(&["/Volumes/A", "/Volumes/B"]);
        let next = q.next_eligible(|_| true, |p| p == Path::new("/Volumes/A"));
        assert_eq!(next, Some(PathBuf::from("/Volumes/B")));
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![Path::new("/Volumes/A")]);
    }

    #[test]
    fn test_next_eligible_scans_once() {
        let mut q = queue(&["/Volumes/A", "/Volumes/B"]);
        let mut checks = 0;
        let next = q.next_eligible(
            |_| {
                checks += 1;
                true
            },
            |_| true,
        );
        assert_eq!(next, None);
        assert_eq!(checks, 2);
        // Order preserved after a full rotation
        assert_eq!(
            q.iter().collect::<Vec<_>>(),
            vec![Path::new("/Volumes/A"), Path::new("/Volumes/B")]
        );
    }
}
