//! Flashing session state machine
//!
//! [`Orchestrator`] owns every piece of mutable session state: the loaded
//! bundle, the slot queue, the pending volumes, the active copy marker and
//! the remount suppression registry. Its handlers are called one at a time
//! by the service loop and never block on a copy; copies are handed to a
//! [`CopyLauncher`] and come back through [`Orchestrator::copy_finished`].
//!
//! Slots are always assigned in `[Right, Left]` order. A volume that cannot
//! be used right away is parked in the pending queue and picked up by
//! [`Orchestrator::dispatch_pending`] once a slot is free.

use crate::bundle::{Extractor, FirmwareBundle, IngestRequest, resolve_archive};
use crate::config::Config;
use crate::copier::{CopyCompletion, CopyJob, describe_copy_error};
use crate::error::Result;
use crate::events::{Event, EventSink, HistoryEntry, StatusLevel, now_millis};
use crate::ignore::{IgnoreKey, IgnoreRegistry};
use crate::pending::PendingQueue;
use crate::slot::{Slot, SlotStatus};
use splitflasher_detect::VolumeClassifier;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Starts copies away from the session loop
pub trait CopyLauncher: Send {
    /// Run `job` and feed its [`CopyCompletion`] back to the session
    fn launch(&mut self, job: CopyJob);
}

/// The copy currently running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCopy {
    /// Slot being flashed
    pub slot: Slot,
    /// Target volume
    pub volume: PathBuf,
}

/// One flashing session
pub struct Orchestrator {
    classifier: VolumeClassifier,
    extractor: Box<dyn Extractor>,
    launcher: Box<dyn CopyLauncher>,
    sink: Arc<dyn EventSink>,

    bundle: Option<FirmwareBundle>,
    slot_queue: VecDeque<Slot>,
    pending: PendingQueue,
    known: HashSet<PathBuf>,
    active_copy: Option<ActiveCopy>,
    ignore: IgnoreRegistry,
    history: Vec<HistoryEntry>,
    generation: u64,
}

impl Orchestrator {
    /// Create an idle session
    pub fn new(
        config: &Config,
        classifier: VolumeClassifier,
        extractor: Box<dyn Extractor>,
        launcher: Box<dyn CopyLauncher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            classifier,
            extractor,
            launcher,
            sink,
            bundle: None,
            slot_queue: VecDeque::new(),
            pending: PendingQueue::new(),
            known: HashSet::new(),
            active_copy: None,
            ignore: IgnoreRegistry::new(config.ignore_window),
            history: Vec::new(),
            generation: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Feed every target volume already mounted through [`volume_added`](Self::volume_added)
    ///
    /// # Errors
    ///
    /// Returns an error if the mount root cannot be read.
    pub fn scan_existing(&mut self) -> Result<usize> {
        let mut volumes = Vec::new();
        for entry in std::fs::read_dir(self.classifier.mount_root())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                volumes.push(entry.path());
            }
        }
        volumes.sort();

        let mut count = 0;
        for path in volumes {
            if self.classifier.is_target(&path) {
                self.volume_added(&path);
                count += 1;
            }
        }
        Ok(count)
    }

    /// A directory appeared under the mount root
    pub fn volume_added(&mut self, path: &Path) {
        if !self.classifier.is_target(path) {
            tracing::debug!("Ignoring non-target entry {:?}", path);
            return;
        }
        tracing::info!("Device detected: {}", path.display());

        let device_id = self.classifier.resolve_device_id(path);
        let key = IgnoreKey::for_volume(path, device_id.as_deref());
        if let Some(flashed) = self.ignore.lookup(&key) {
            self.known.insert(path.to_path_buf());
            if let Some(&next) = self.slot_queue.front() {
                self.emit(Event::slot_status(
                    StatusLevel::Info,
                    format!(
                        "{} device remounted automatically. Connect the {} device.",
                        flashed.title(),
                        next
                    ),
                    next,
                    SlotStatus::Waiting,
                ));
            } else {
                tracing::debug!("Suppressed remount of {:?} ({})", path, flashed);
            }
            return;
        }

        if !self.known.insert(path.to_path_buf()) {
            tracing::debug!("Duplicate mount event for {:?}", path);
            return;
        }

        if self.bundle.is_none() || self.slot_queue.is_empty() {
            self.pending.push(path);
            self.emit(Event::status(
                StatusLevel::Warning,
                "Firmware is not ready. Load a firmware archive first.",
            ));
            return;
        }

        self.enqueue(path);
    }

    /// A directory disappeared from the mount root
    pub fn volume_removed(&mut self, path: &Path) {
        tracing::debug!("Volume removed: {:?}", path);
        self.known.remove(path);
        self.pending.remove(path);
        self.classifier.forget(path);
    }

    /// The mount watcher reported a fault; watching continues
    pub fn watcher_failed(&mut self, message: &str) {
        self.emit(Event::error(format!("Volume watching failed: {message}"), None));
    }

    /// Load a firmware archive and start a new session
    ///
    /// Failures are reported as an [`Event::Error`] and returned.
    ///
    /// # Errors
    ///
    /// Returns the validation, extraction or selection error.
    pub fn ingest(&mut self, request: IngestRequest) -> Result<()> {
        tracing::info!("Loading firmware archive");
        let result = self.try_ingest(request);
        if let Err(ref e) = result {
            self.emit(Event::error(e.to_string(), None));
        }
        result
    }

    fn try_ingest(&mut self, request: IngestRequest) -> Result<()> {
        // Validation happens before the current bundle is touched.
        let archive = resolve_archive(request)?;

        self.discard_bundle();

        let (bundle, leftovers) = FirmwareBundle::prepare(archive.path(), self.extractor.as_ref())?;
        if !leftovers.is_empty() {
            let names: Vec<&str> = leftovers.iter().map(|c| c.name.as_str()).collect();
            self.emit(Event::status(
                StatusLevel::Warning,
                format!(
                    "Found {} additional UF2 file(s) that will not be used: {}",
                    leftovers.len(),
                    names.join(", ")
                ),
            ));
        }

        let files = bundle.files().clone();
        let temp_dir = bundle.temp_dir().to_path_buf();
        self.bundle = Some(bundle);
        self.generation += 1;
        self.slot_queue = VecDeque::from(Slot::ORDER);
        self.history.clear();

        let known = &self.known;
        let snapshot: Vec<PathBuf> = self
            .pending
            .take_all()
            .into_iter()
            .filter(|p| known.contains(p))
            .collect();

        self.emit(Event::Ready { files, temp_dir });
        self.emit(Event::slot_status(
            StatusLevel::Info,
            format!("Connect the {} device.", Slot::Right),
            Slot::Right,
            SlotStatus::Waiting,
        ));

        for path in snapshot {
            self.enqueue(&path);
        }
        Ok(())
    }

    /// Drop the bundle and every queue; always succeeds
    pub fn reset(&mut self) {
        self.pending.clear();
        self.slot_queue.clear();
        self.active_copy = None;
        self.discard_bundle();
        self.emit(Event::status(
            StatusLevel::Info,
            "Session reset. Load a firmware archive to start again.",
        ));
    }

    /// A launched copy finished
    pub fn copy_finished(&mut self, completion: CopyCompletion) {
        let CopyCompletion { job, result } = completion;
        if job.generation != self.generation {
            tracing::info!(
                "Ignoring {} copy to {:?} from an earlier session",
                job.slot,
                job.volume
            );
            return;
        }
        self.active_copy = None;

        let slot = job.slot;
        match result {
            Ok(outcome) => {
                tracing::debug!(
                    "{} copy took {:?} over {} attempt(s)",
                    slot.title(),
                    outcome.elapsed,
                    outcome.attempts
                );
                self.sink.emit(Event::Progress {
                    slot,
                    bytes_written: job.total_bytes,
                    total_bytes: job.total_bytes,
                    volume_path: job.volume.clone(),
                });
                self.ignore
                    .arm(IgnoreKey::for_volume(&job.volume, job.device_id.as_deref()), slot);
                self.record(HistoryEntry {
                    slot,
                    success: true,
                    volume_path: job.volume,
                    message: Some(format!("{} write complete", slot.title())),
                    finished_at: now_millis(),
                });
                self.emit(Event::slot_status(
                    StatusLevel::Success,
                    format!("{} copy finished.", slot.title()),
                    slot,
                    SlotStatus::Success,
                ));
            }
            Err(err) => {
                self.record(HistoryEntry {
                    slot,
                    success: false,
                    message: Some(describe_copy_error(&err, slot, &job.volume)),
                    volume_path: job.volume,
                    finished_at: now_millis(),
                });
                self.emit(Event::slot_status(
                    StatusLevel::Error,
                    format!("{} copy failed.", slot.title()),
                    slot,
                    SlotStatus::Error,
                ));
                // A half-flashed pair cannot be resumed.
                self.discard_bundle();
                self.pending.clear();
                self.emit(Event::error(err.to_string(), Some(slot)));
                return;
            }
        }

        if let Some(&next) = self.slot_queue.front() {
            self.emit(Event::slot_status(
                StatusLevel::Info,
                format!("Connect the device for the {next}."),
                next,
                SlotStatus::Waiting,
            ));
        } else {
            self.emit(Event::status(
                StatusLevel::Success,
                "Both halves have been flashed.",
            ));
            self.discard_bundle();
        }

        self.dispatch_pending();
    }

    /// Forget every suppressed remount so reconnected devices count as new
    pub fn release_suppression(&mut self) {
        let released = self.ignore.len();
        self.ignore.clear();
        tracing::debug!("Released {} suppression entries", released);
        self.emit(Event::status(
            StatusLevel::Info,
            "Remount suppression released. Reconnect a device to flash it again.",
        ));
        self.dispatch_pending();
    }

    /// Drop lapsed suppression entries; returns how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let purged = self.ignore.purge_expired(Instant::now());
        if purged > 0 {
            tracing::debug!("{} suppression entries expired", purged);
            self.dispatch_pending();
        }
        purged
    }

    /// When the next suppression entry lapses
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ignore.next_expiry()
    }

    /// Start a copy for the first eligible pending volume, if a slot is free
    pub fn dispatch_pending(&mut self) {
        if self.active_copy.is_some() || self.bundle.is_none() || self.slot_queue.is_empty() {
            return;
        }

        let known = &self.known;
        let classifier = &self.classifier;
        let ignore = &mut self.ignore;
        let next = self.pending.next_eligible(
            |p| known.contains(p),
            |p| {
                ignore
                    .lookup(&IgnoreKey::for_volume(p, classifier.cached_device_id(p)))
                    .is_some()
            },
        );

        let Some(volume) = next else {
            return;
        };
        if let Some(slot) = self.slot_queue.pop_front() {
            self.start_copy(slot, volume);
        }
    }

    // ------------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------------

    /// The loaded bundle
    pub fn bundle(&self) -> Option<&FirmwareBundle> {
        self.bundle.as_ref()
    }

    /// Slots still waiting for a device, in order
    pub fn remaining_slots(&self) -> Vec<Slot> {
        self.slot_queue.iter().copied().collect()
    }

    /// Volumes waiting for a slot, front first
    pub fn pending_volumes(&self) -> Vec<PathBuf> {
        self.pending.iter().map(Path::to_path_buf).collect()
    }

    /// The copy in progress
    pub fn active_copy(&self) -> Option<&ActiveCopy> {
        self.active_copy.as_ref()
    }

    /// Finished copies of this bundle, most recent first
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Whether `path` is currently mounted and known to the session
    pub fn is_known(&self, path: &Path) -> bool {
        self.known.contains(path)
    }

    /// Number of live suppression entries
    pub fn suppressed_count(&self) -> usize {
        self.ignore.len()
    }

    /// Counter bumped whenever a bundle is loaded or discarded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn enqueue(&mut self, path: &Path) {
        if self.active_copy.is_some() {
            if self.pending.push(path) {
                match self.slot_queue.front() {
                    Some(&next) => self.emit(Event::slot_status(
                        StatusLevel::Info,
                        format!(
                            "{} device detected. It will start after the current copy.",
                            next.title()
                        ),
                        next,
                        SlotStatus::Waiting,
                    )),
                    None => self.emit(Event::status(
                        StatusLevel::Info,
                        "A copy is in progress. The next device will be handled afterwards.",
                    )),
                }
            }
            return;
        }

        let Some(slot) = self.slot_queue.pop_front() else {
            self.pending.push(path);
            return;
        };
        self.start_copy(slot, path.to_path_buf());
    }

    fn start_copy(&mut self, slot: Slot, volume: PathBuf) {
        let Some(bundle) = self.bundle.as_ref() else {
            self.emit(Event::error("Firmware is not ready.", Some(slot)));
            return;
        };
        let file = bundle.file(slot).clone();

        let label = volume
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| volume.display().to_string());
        self.active_copy = Some(ActiveCopy {
            slot,
            volume: volume.clone(),
        });
        self.emit(Event::slot_status(
            StatusLevel::Info,
            format!("Copying to {label} ({slot})."),
            slot,
            SlotStatus::Copying,
        ));

        let device_id = self.classifier.resolve_device_id(&volume);
        self.launcher.launch(CopyJob {
            slot,
            volume,
            source: file.path,
            file_name: file.file_name,
            total_bytes: file.size,
            device_id,
            generation: self.generation,
        });
    }

    fn discard_bundle(&mut self) {
        if let Some(bundle) = self.bundle.take() {
            tracing::debug!("Discarding bundle at {:?}", bundle.temp_dir());
            drop(bundle);
            self.generation += 1;
        }
        self.slot_queue.clear();
        self.active_copy = None;
        self.ignore.clear();
        self.history.clear();
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.history.insert(0, entry.clone());
        self.emit(Event::Result(entry));
    }

    fn emit(&self, event: Event) {
        event.log();
        self.sink.emit(event);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bundle", &self.bundle)
            .field("slot_queue", &self.slot_queue)
            .field("pending", &self.pending)
            .field("active_copy", &self.active_copy)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
