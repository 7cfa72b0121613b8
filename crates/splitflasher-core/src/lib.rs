//! # SplitFlasher Core
//!
//! Session engine for flashing the two halves of a split keyboard through
//! their UF2 bootloader volumes.
//!
//! ## Modules
//!
//! - `bundle`: Archive ingestion and per-half image selection
//! - `copier`: Chunked copy engine with retry for transient OS errors
//! - `orchestrator`: Session state machine (slots, pending volumes, suppression)
//! - `service`: Background thread driving the orchestrator
//! - `events`: Outbound notifications and sinks
//! - `ignore`: Remount suppression registry
//! - `error`: Error types and result aliases
//! - `config`: Runtime configuration
//! - `settings`: Persistent user settings from configuration file
//!
//! ## Example
//!
//! ```ignore
//! use splitflasher_core::{Config, IngestRequest, SplitFlasher};
//! use std::sync::{mpsc, Arc};
//!
//! let (tx, rx) = mpsc::channel();
//! let flasher = SplitFlasher::with_config(Config::new().mount_root("/Volumes"));
//! let handle = flasher.spawn(Arc::new(tx))?;
//!
//! handle.ingest(IngestRequest::Path("corne.zip".into()))?;
//! for event in rx {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod config;
pub mod copier;
pub mod error;
pub mod events;
pub mod ignore;
pub mod orchestrator;
pub mod pending;
pub mod service;
pub mod settings;
pub mod slot;

pub use bundle::{
    Candidate, Extractor, FirmwareBundle, FirmwareFile, IngestRequest, ZipExtractor,
    matches_slot, select_slot_files,
};
pub use config::{Config, DEFAULT_IGNORE_WINDOW_MS, DEFAULT_IMAGE_EXTENSION};
pub use copier::{
    CopyConfig, CopyJob, CopyOutcome, CopyProgress, Copier, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, StdFs, TargetFs, describe_copy_error,
    is_transient,
};
pub use error::{Error, Result};
pub use events::{Event, EventSink, HistoryEntry, MemorySink, StatusLevel};
pub use ignore::{IgnoreKey, IgnoreRegistry};
pub use orchestrator::{ActiveCopy, CopyLauncher, Orchestrator};
pub use pending::PendingQueue;
pub use service::{FlashService, Input, ServiceHandle, ThreadLauncher};
pub use settings::{CopySettings, SessionSettings, Settings, SettingsError, VolumeSettings};
pub use slot::{Slot, SlotMap, SlotStatus};

use splitflasher_detect::{VolumeClassifier, default_resolver};
use std::sync::Arc;

/// Starts flashing sessions from a configuration
pub struct SplitFlasher {
    config: Config,
}

impl SplitFlasher {
    /// Create a new SplitFlasher instance with default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Create a new SplitFlasher instance with custom configuration
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Classifier for the configured mount root and labels
    pub fn classifier(&self) -> VolumeClassifier {
        VolumeClassifier::new(
            &self.config.mount_root,
            self.config.labels.clone(),
            default_resolver(),
        )
    }

    /// Start a session thread that extracts archives in-process
    ///
    /// # Errors
    ///
    /// Returns an error if the session thread cannot be spawned.
    pub fn spawn(&self, sink: Arc<dyn EventSink>) -> Result<ServiceHandle> {
        let extractor = ZipExtractor::new().extension(self.config.image_extension.clone());
        FlashService::spawn(&self.config, self.classifier(), Box::new(extractor), sink)
    }
}

impl Default for SplitFlasher {
    fn default() -> Self {
        Self::new()
    }
}
