//! Error types for the SplitFlasher core library

use crate::slot::Slot;
use thiserror::Error;

/// Main error type for SplitFlasher operations
#[derive(Error, Debug)]
pub enum Error {
    /// The archive is missing, unreadable or not a `.zip`
    #[error("Invalid firmware archive: {0}")]
    InvalidArchive(String),

    /// The archive contains no `.uf2` images
    #[error("No UF2 files were found in the archive")]
    NoFirmwareFiles,

    /// The archive has no file for one of the halves
    #[error("Could not identify right/left UF2 files in the archive. Found: {found}")]
    UnmatchedSlots {
        /// Comma separated list of discovered file names, or "none"
        found: String,
    },

    /// Archive extraction failed
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// No firmware bundle is loaded
    #[error("Firmware is not ready")]
    NoBundle,

    /// The loaded bundle has no file for a slot
    #[error("No firmware file for the {0}")]
    MissingSlotFile(Slot),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Volume watching failed
    #[error("Volume watching failed: {0}")]
    Watcher(#[from] splitflasher_detect::DetectError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session thread is no longer running
    #[error("Flash session has stopped")]
    ServiceStopped,
}

/// Result type alias using the SplitFlasher error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArchive("Please choose a .zip file".to_string());
        assert!(err.to_string().contains(".zip"));

        let err = Error::UnmatchedSlots {
            found: "a.uf2, b.uf2".to_string(),
        };
        assert!(err.to_string().contains("a.uf2, b.uf2"));

        let err = Error::MissingSlotFile(Slot::Left);
        assert_eq!(err.to_string(), "No firmware file for the left half");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_detect() {
        let detect = splitflasher_detect::DetectError::Watcher("inotify limit".to_string());
        let err: Error = detect.into();
        assert!(matches!(err, Error::Watcher(_)));
        assert!(err.to_string().contains("inotify limit"));
    }
}
