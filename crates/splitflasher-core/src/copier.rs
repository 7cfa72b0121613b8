//! Firmware copy engine
//!
//! This module copies an image onto a bootloader volume:
//! - Chunked streaming with a progress callback after every chunk
//! - Whole-file retry for transient OS errors (`EACCES`, `EBUSY`, `EPERM`, `EIO`)
//! - Replacement of any existing destination before each attempt
//!
//! Bootloader volumes are small FAT images emulated by the device, and they
//! commonly reject writes for a moment right after mounting. A failed
//! attempt therefore restarts from byte zero instead of resuming.

use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::slot::Slot;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default chunk size (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Minimum chunk size (512 B)
pub const MIN_CHUNK_SIZE: usize = 512;

/// Maximum chunk size (16 MB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default number of attempts per copy
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 400;

/// Copy progress information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyProgress {
    /// Bytes written in the current attempt
    pub bytes_written: u64,

    /// Size of the source
    pub total_bytes: u64,

    /// Attempt number, starting at 1
    pub attempt: u32,
}

impl CopyProgress {
    /// Calculate completion percentage (0.0 to 100.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_written as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Check if the copy is complete
    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.total_bytes
    }
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(&CopyProgress) + Send + Sync>;

/// Configuration for copy operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyConfig {
    /// Bytes read and written per chunk
    pub chunk_size: usize,

    /// Attempts per copy, including the first
    pub max_attempts: u32,

    /// Delay before a retry
    pub retry_delay: Duration,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl CopyConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size (clamped to valid range)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// Set attempts per copy (at least 1)
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Result of a successful copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Bytes written by the successful attempt
    pub bytes_written: u64,

    /// Attempts used, including the successful one
    pub attempts: u32,

    /// Total time including retries
    pub elapsed: Duration,
}

/// Destination filesystem operations
///
/// Abstracted so tests can inject failures.
pub trait TargetFs: Send + Sync {
    /// Create or truncate `path` for writing
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Remove `path`
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`TargetFs`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl TargetFs for StdFs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// OS error classes a copy is retried for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// `EACCES`
    AccessDenied,
    /// `EBUSY`
    Busy,
    /// `EIO`
    Io,
    /// `EPERM`
    NotPermitted,
}

/// Classify an I/O error as one of the retryable classes
pub fn transient_kind(err: &io::Error) -> Option<TransientKind> {
    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return match code {
            libc::EACCES => Some(TransientKind::AccessDenied),
            libc::EBUSY => Some(TransientKind::Busy),
            libc::EIO => Some(TransientKind::Io),
            libc::EPERM => Some(TransientKind::NotPermitted),
            _ => None,
        };
    }

    match err.kind() {
        io::ErrorKind::PermissionDenied => Some(TransientKind::AccessDenied),
        io::ErrorKind::ResourceBusy => Some(TransientKind::Busy),
        _ => None,
    }
}

/// Whether a failed attempt should be retried
pub fn is_transient(err: &io::Error) -> bool {
    transient_kind(err).is_some()
}

/// User-facing explanation of a failed copy
pub fn describe_copy_error(err: &Error, slot: Slot, volume: &Path) -> String {
    let Error::Io(io_err) = err else {
        return err.to_string();
    };

    let target = volume.display();
    match transient_kind(io_err) {
        Some(TransientKind::AccessDenied) => format!(
            "Could not write to the {slot} volume (permission denied). Check that the UF2 file \
             can be copied manually and that this program may access removable volumes. \
             Target: {target}"
        ),
        Some(TransientKind::Busy) => format!(
            "The {slot} volume is busy. Wait a few seconds and reconnect the device. \
             Target: {target}"
        ),
        Some(TransientKind::Io) => format!(
            "An I/O error occurred while writing to the {slot}. Check the USB cable and try \
             again. Target: {target}"
        ),
        Some(TransientKind::NotPermitted) => format!(
            "The operation on the {slot} volume was not permitted. Check the security settings \
             and reconnect the device. Target: {target}"
        ),
        None => err.to_string(),
    }
}

/// Copy engine
pub struct Copier {
    config: CopyConfig,
    fs: Arc<dyn TargetFs>,
    progress_callback: Option<ProgressCallback>,
}

impl Copier {
    /// Create a new copier with default configuration
    pub fn new() -> Self {
        Self::with_config(CopyConfig::default())
    }

    /// Create a new copier with custom configuration
    pub fn with_config(config: CopyConfig) -> Self {
        Self {
            config,
            fs: Arc::new(StdFs),
            progress_callback: None,
        }
    }

    /// Use a different destination filesystem
    pub fn fs(mut self, fs: Arc<dyn TargetFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Set a progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CopyProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Copy `source` to `destination`
    ///
    /// # Errors
    ///
    /// Returns the last I/O error once attempts are exhausted, or the first
    /// error that is not transient.
    pub fn copy_file(&self, source: &Path, destination: &Path, total_bytes: u64) -> Result<CopyOutcome> {
        let start = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                self.report(0, total_bytes, attempt);
            }

            match self.attempt(source, destination, total_bytes, attempt) {
                Ok(bytes_written) => {
                    tracing::debug!(
                        "Copied {} bytes to {:?} in {} attempt(s)",
                        bytes_written,
                        destination,
                        attempt
                    );
                    return Ok(CopyOutcome {
                        bytes_written,
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Copy attempt {}/{} to {:?} failed: {}",
                        attempt,
                        max_attempts,
                        destination,
                        e
                    );
                    if attempt >= max_attempts || !is_transient(&e) {
                        return Err(Error::Io(e));
                    }
                    self.remove_quietly(destination);
                    std::thread::sleep(self.config.retry_delay);
                }
            }
        }
    }

    fn attempt(&self, source: &Path, destination: &Path, total_bytes: u64, attempt: u32) -> io::Result<u64> {
        self.remove_quietly(destination);

        let mut reader = File::open(source)?;
        let mut writer = self.fs.create(destination)?;
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut written = 0u64;

        loop {
            let n = read_exact_or_eof(&mut reader, &mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            written += n as u64;
            self.report(written, total_bytes, attempt);
        }

        writer.flush()?;
        Ok(written)
    }

    fn report(&self, bytes_written: u64, total_bytes: u64, attempt: u32) {
        if let Some(ref callback) = self.progress_callback {
            callback(&CopyProgress {
                bytes_written,
                total_bytes,
                attempt,
            });
        }
    }

    fn remove_quietly(&self, path: &Path) {
        match self.fs.remove(path) {
            Ok(()) => tracing::debug!("Removed existing {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!("Could not remove {:?}: {}", path, e),
        }
    }
}

impl Default for Copier {
    fn default() -> Self {
        Self::new()
    }
}

/// Read exactly the buffer size or until EOF
fn read_exact_or_eof<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut total_read = 0;

    while total_read < buffer.len() {
        match reader.read(&mut buffer[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(total_read)
}

/// A copy the session has committed a volume to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    /// Slot being flashed
    pub slot: Slot,
    /// Target volume
    pub volume: PathBuf,
    /// Image to copy
    pub source: PathBuf,
    /// File name on the volume
    pub file_name: String,
    /// Image size
    pub total_bytes: u64,
    /// Device identifier of the volume, if resolved
    pub device_id: Option<String>,
    /// Session generation the job was started under
    pub generation: u64,
}

impl CopyJob {
    /// Destination path on the volume
    pub fn destination(&self) -> PathBuf {
        self.volume.join(&self.file_name)
    }

    /// Perform the copy, pushing progress events into `sink`
    pub fn run(self, config: &CopyConfig, fs: Arc<dyn TargetFs>, sink: Arc<dyn EventSink>) -> CopyCompletion {
        let slot = self.slot;
        let volume = self.volume.clone();
        let copier = Copier::with_config(config.clone())
            .fs(fs)
            .on_progress(move |p| {
                sink.emit(Event::Progress {
                    slot,
                    bytes_written: p.bytes_written,
                    total_bytes: p.total_bytes,
                    volume_path: volume.clone(),
                });
            });

        let result = copier.copy_file(&self.source, &self.destination(), self.total_bytes);
        CopyCompletion { job: self, result }
    }
}

/// Outcome of a [`CopyJob`]
#[derive(Debug)]
pub struct CopyCompletion {
    /// The job that ran
    pub job: CopyJob,
    /// What happened
    pub result: Result<CopyOutcome>,
}

// ============================================================================
// UNIT TESTS
// ============================================================================
