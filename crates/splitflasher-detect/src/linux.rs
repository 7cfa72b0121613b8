//! Linux device identity lookup
//!
//! Uses /proc/mounts to map a mount point back to the block device backing it.

use super::{DetectError, DeviceIdResolver, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the kernel mount table
const MOUNT_TABLE: &str = "/proc/mounts";

/// A single entry of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub filesystem: String,
}

/// Resolves mount points through the kernel mount table
#[derive(Debug, Clone)]
pub struct MountTableResolver {
    table: PathBuf,
}

impl MountTableResolver {
    /// Resolver reading `/proc/mounts`
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: PathBuf::from(MOUNT_TABLE),
        }
    }

    /// Resolver reading an alternative mount table file
    pub fn with_table(table: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
        }
    }

    fn lookup(&self, mount_path: &Path) -> Result<Option<String>> {
        let content = fs::read_to_string(&self.table).map_err(|e| {
            DetectError::CommandFailed(format!("Failed to read {}: {e}", self.table.display()))
        })?;

        let wanted = mount_path.to_string_lossy();
        // Later lines shadow earlier mounts on the same point.
        Ok(content
            .lines()
            .filter_map(parse_mount_line)
            .filter(|entry| entry.mount_point == wanted)
            .last()
            .map(|entry| entry.device))
    }
}

impl Default for MountTableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdResolver for MountTableResolver {
    fn resolve(&self, mount_path: &Path) -> Option<String> {
        match self.lookup(mount_path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("Device lookup for {:?} failed: {}", mount_path, e);
                None
            }
        }
    }
}

/// Parse a single line from /proc/mounts
/// Format: device `mount_point` filesystem options dump pass
pub(crate) fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 3 {
        Some(MountEntry {
            device: unescape_mount_field(parts[0]),
            mount_point: unescape_mount_field(parts[1]),
            filesystem: parts[2].to_string(),
        })
    } else {
        None
    }
}

/// Decode the octal escapes (`\040` for space) the kernel uses in mount fields
pub(crate) fn unescape_mount_field(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }

        let mut oct = String::new();
        while oct.len() < 3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    oct.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }

        match u8::from_str_radix(&oct, 8) {
            Ok(value) if oct.len() == 3 && value.is_ascii() => output.push(value as char),
            _ => {
                output.push('\\');
                output.push_str(&oct);
            }
        }
    }

    output
}
