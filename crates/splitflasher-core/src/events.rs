//! Outbound notifications
//!
//! The session reports everything it does as [`Event`]s pushed into an
//! [`EventSink`]. Sinks must not block: progress events in particular are
//! sent from the copy worker while a copy is running.

use crate::bundle::FirmwareFile;
use crate::slot::{Slot, SlotMap, SlotStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    /// Informational
    Info,
    /// Something needs attention
    Warning,
    /// A step completed
    Success,
    /// A step failed
    Error,
}

/// Record of a finished copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Slot that was flashed
    pub slot: Slot,
    /// Whether the copy succeeded
    pub success: bool,
    /// Volume the firmware was copied to
    pub volume_path: PathBuf,
    /// Human readable outcome
    pub message: Option<String>,
    /// Completion time, milliseconds since the Unix epoch
    pub finished_at: u64,
}

/// Notification emitted by a flashing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A firmware bundle was loaded
    Ready {
        /// Image selected for each slot
        files: SlotMap<FirmwareFile>,
        /// Scratch directory owned by the bundle
        temp_dir: PathBuf,
    },

    /// Status line
    Status {
        /// Severity
        level: StatusLevel,
        /// Message text
        message: String,
        /// Slot the message is about
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<Slot>,
        /// New state of that slot
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_status: Option<SlotStatus>,
    },

    /// Bytes copied so far
    Progress {
        /// Slot being flashed
        slot: Slot,
        /// Cumulative bytes written in the current attempt
        bytes_written: u64,
        /// Size of the image
        total_bytes: u64,
        /// Target volume
        volume_path: PathBuf,
    },

    /// A copy finished
    Result(HistoryEntry),

    /// A failure the user should see
    Error {
        /// Message text
        message: String,
        /// Slot the failure belongs to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<Slot>,
    },
}

impl Event {
    /// Status event not tied to a slot
    pub fn status(level: StatusLevel, message: impl Into<String>) -> Self {
        Event::Status {
            level,
            message: message.into(),
            slot: None,
            next_status: None,
        }
    }

    /// Status event moving `slot` to `next_status`
    pub fn slot_status(
        level: StatusLevel,
        message: impl Into<String>,
        slot: Slot,
        next_status: SlotStatus,
    ) -> Self {
        Event::Status {
            level,
            message: message.into(),
            slot: Some(slot),
            next_status: Some(next_status),
        }
    }

    /// Error event
    pub fn error(message: impl Into<String>, slot: Option<Slot>) -> Self {
        Event::Error {
            message: message.into(),
            slot,
        }
    }

    /// Write the event to the log at a matching level
    pub fn log(&self) {
        match self {
            Event::Ready { files, .. } => {
                tracing::info!(
                    "Firmware ready: right={}, left={}",
                    files.right.file_name,
                    files.left.file_name
                );
            }
            Event::Status { level, message, .. } => match level {
                StatusLevel::Info | StatusLevel::Success => tracing::info!("{}", message),
                StatusLevel::Warning => tracing::warn!("{}", message),
                StatusLevel::Error => tracing::error!("{}", message),
            },
            Event::Progress { .. } => {}
            Event::Result(entry) => {
                let message = entry.message.as_deref().unwrap_or_default();
                if entry.success {
                    tracing::info!("{}", message);
                } else {
                    tracing::error!("{}", message);
                }
            }
            Event::Error { message, .. } => tracing::error!("{}", message),
        }
    }
}

/// Receiver of session events
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: Event);
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&self, event: Event) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the recorded events
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Remove and return the recorded events
    pub fn take(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
