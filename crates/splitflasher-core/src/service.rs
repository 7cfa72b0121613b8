//! Session thread
//!
//! [`FlashService::spawn`] moves an [`Orchestrator`] onto its own thread and
//! feeds it [`Input`]s from a channel. The loop wakes up early when a
//! suppression entry is due to lapse so expired entries are purged on time.

use crate::bundle::{Extractor, IngestRequest};
use crate::config::Config;
use crate::copier::{CopyCompletion, CopyConfig, CopyJob, StdFs, TargetFs};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::orchestrator::{CopyLauncher, Orchestrator};
use splitflasher_detect::{MountEvent, VolumeClassifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Slack added to suppression deadlines so an entry is past due when purged
const DEADLINE_SLACK: Duration = Duration::from_millis(1);

/// Message processed by the session thread
#[derive(Debug)]
pub enum Input {
    /// A volume mounted
    VolumeAdded(PathBuf),
    /// A volume unmounted
    VolumeRemoved(PathBuf),
    /// The mount watcher failed
    WatcherFailed(String),
    /// Report already mounted volumes
    Scan,
    /// Load a firmware archive
    Ingest {
        /// Archive to load
        request: IngestRequest,
        /// Receives the outcome
        reply: Option<mpsc::Sender<Result<()>>>,
    },
    /// Drop the session
    Reset,
    /// Clear remount suppression
    ReleaseSuppression,
    /// A copy finished
    CopyFinished(CopyCompletion),
    /// Stop the thread
    Shutdown,
}

impl From<MountEvent> for Input {
    fn from(event: MountEvent) -> Self {
        match event {
            MountEvent::Added(path) => Input::VolumeAdded(path),
            MountEvent::Removed(path) => Input::VolumeRemoved(path),
            MountEvent::Error(message) => Input::WatcherFailed(message),
        }
    }
}

/// Runs each copy on its own worker thread
pub struct ThreadLauncher {
    config: CopyConfig,
    fs: Arc<dyn TargetFs>,
    inbox: mpsc::Sender<Input>,
    sink: Arc<dyn EventSink>,
}

impl ThreadLauncher {
    /// Create a launcher posting completions to `inbox`
    pub fn new(config: CopyConfig, inbox: mpsc::Sender<Input>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            fs: Arc::new(StdFs),
            inbox,
            sink,
        }
    }

    /// Use a different destination filesystem
    pub fn fs(mut self, fs: Arc<dyn TargetFs>) -> Self {
        self.fs = fs;
        self
    }
}

impl CopyLauncher for ThreadLauncher {
    fn launch(&mut self, job: CopyJob) {
        let config = self.config.clone();
        let fs = Arc::clone(&self.fs);
        let sink = Arc::clone(&self.sink);
        let inbox = self.inbox.clone();
        let fallback = job.clone();

        let spawned = thread::Builder::new()
            .name(format!("copy-{}", job.slot.name()))
            .spawn(move || {
                let completion = job.run(&config, fs, sink);
                if inbox.send(Input::CopyFinished(completion)).is_err() {
                    tracing::debug!("Session stopped before the copy finished");
                }
            });

        if let Err(e) = spawned {
            tracing::error!("Failed to start copy thread: {}", e);
            let completion = CopyCompletion {
                job: fallback,
                result: Err(Error::Io(e)),
            };
            if self.inbox.send(Input::CopyFinished(completion)).is_err() {
                tracing::debug!("Session stopped before the copy failure was delivered");
            }
        }
    }
}

/// Entry point for running a session on a background thread
pub struct FlashService;

impl FlashService {
    /// Start the session thread
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        config: &Config,
        classifier: VolumeClassifier,
        extractor: Box<dyn Extractor>,
        sink: Arc<dyn EventSink>,
    ) -> Result<ServiceHandle> {
        let (tx, rx) = mpsc::channel();
        let launcher = ThreadLauncher::new(config.copy.clone(), tx.clone(), Arc::clone(&sink));
        Self::spawn_with(config, classifier, extractor, Box::new(launcher), sink, (tx, rx))
    }

    /// Start the session thread with a custom launcher
    ///
    /// `channel` must be the channel the launcher posts completions to.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_with(
        config: &Config,
        classifier: VolumeClassifier,
        extractor: Box<dyn Extractor>,
        launcher: Box<dyn CopyLauncher>,
        sink: Arc<dyn EventSink>,
        channel: (mpsc::Sender<Input>, mpsc::Receiver<Input>),
    ) -> Result<ServiceHandle> {
        let (tx, rx) = channel;
        let orchestrator = Orchestrator::new(config, classifier, extractor, launcher, sink);
        let thread = thread::Builder::new()
            .name("flash-session".to_string())
            .spawn(move || run_loop(orchestrator, &rx))?;

        Ok(ServiceHandle {
            tx,
            thread: Some(thread),
        })
    }
}

fn run_loop(mut orchestrator: Orchestrator, rx: &mpsc::Receiver<Input>) {
    tracing::debug!("Flash session started");

    loop {
        let input = match orchestrator.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now()) + DEADLINE_SLACK;
                match rx.recv_timeout(timeout) {
                    Ok(input) => Some(input),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(input) => Some(input),
                Err(_) => break,
            },
        };

        orchestrator.purge_expired();

        let Some(input) = input else {
            continue;
        };

        match input {
            Input::VolumeAdded(path) => orchestrator.volume_added(&path),
            Input::VolumeRemoved(path) => orchestrator.volume_removed(&path),
            Input::WatcherFailed(message) => orchestrator.watcher_failed(&message),
            Input::Scan => {
                if let Err(e) = orchestrator.scan_existing() {
                    tracing::warn!("Failed to scan existing volumes: {}", e);
                }
            }
            Input::Ingest { request, reply } => {
                let result = orchestrator.ingest(request);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Input::Reset => orchestrator.reset(),
            Input::ReleaseSuppression => orchestrator.release_suppression(),
            Input::CopyFinished(completion) => orchestrator.copy_finished(completion),
            Input::Shutdown => break,
        }
    }

    tracing::debug!("Flash session stopped");
}

/// Handle to a running session thread
///
/// Dropping the handle stops the thread.
pub struct ServiceHandle {
    tx: mpsc::Sender<Input>,
    thread: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Sender for feeding inputs from other threads (e.g. the mount watcher)
    pub fn sender(&self) -> mpsc::Sender<Input> {
        self.tx.clone()
    }

    /// Post an input
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the thread has exited.
    pub fn send(&self, input: Input) -> Result<()> {
        self.tx.send(input).map_err(|_| Error::ServiceStopped)
    }

    /// Forward a mount watcher event
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the thread has exited.
    pub fn send_volume(&self, event: MountEvent) -> Result<()> {
        self.send(event.into())
    }

    /// Report volumes that were mounted before watching started
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the thread has exited.
    pub fn scan(&self) -> Result<()> {
        self.send(Input::Scan)
    }

    /// Load a firmware archive and wait for the outcome
    ///
    /// # Errors
    ///
    /// Returns the ingestion error, or [`Error::ServiceStopped`].
    pub fn ingest(&self, request: IngestRequest) -> Result<()> {
        let (reply, outcome) = mpsc::channel();
        self.send(Input::Ingest {
            request,
            reply: Some(reply),
        })?;
        outcome.recv().map_err(|_| Error::ServiceStopped)?
    }

    /// Drop the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the thread has exited.
    pub fn reset(&self) -> Result<()> {
        self.send(Input::Reset)
    }

    /// Clear remount suppression
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the thread has exited.
    pub fn release_suppression(&self) -> Result<()> {
        self.send(Input::ReleaseSuppression)
    }

    /// Stop the thread and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Wait for the thread to exit on its own
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Flash session thread panicked");
            }
        }
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Input::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Flash session thread panicked");
            }
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
