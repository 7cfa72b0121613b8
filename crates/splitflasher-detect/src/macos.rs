//! macOS device identity lookup
//!
//! Uses `diskutil info -plist <mount point>` to find the device identifier
//! (e.g. `disk4s1`) backing a mounted volume.

use super::{DetectError, DeviceIdResolver, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Resolves mount points with `diskutil`
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskutilResolver;

impl DiskutilResolver {
    fn lookup(mount_path: &Path) -> Result<Option<String>> {
        let output = Command::new("diskutil")
            .arg("info")
            .arg("-plist")
            .arg(mount_path)
            .output()
            .map_err(|e| DetectError::CommandFailed(format!("diskutil info failed: {e}")))?;

        if !output.status.success() {
            return Err(DetectError::CommandFailed(format!(
                "diskutil info failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let plist_str = String::from_utf8_lossy(&output.stdout);
        let info = parse_disk_info(&plist_str)?;
        Ok(info.get("DeviceIdentifier").cloned())
    }
}

impl DeviceIdResolver for DiskutilResolver {
    fn resolve(&self, mount_path: &Path) -> Option<String> {
        match Self::lookup(mount_path) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!("Device lookup for {:?} failed: {}", mount_path, e);
                None
            }
        }
    }
}

/// Parse disk info plist into a key-value map
pub(crate) fn parse_disk_info(plist: &str) -> Result<HashMap<String, String>> {
    let mut info = HashMap::new();
    let mut current_key: Option<String> = None;

    for line in plist.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("<key>") && trimmed.ends_with("</key>") {
            current_key = Some(
                trimmed
                    .trim_start_matches("<key>")
                    .trim_end_matches("</key>")
                    .to_string(),
            );
        } else if let Some(key) = current_key.take() {
            let value = if trimmed.starts_with("<string>") && trimmed.ends_with("</string>") {
                trimmed
                    .trim_start_matches("<string>")
                    .trim_end_matches("</string>")
                    .to_string()
            } else if trimmed.starts_with("<integer>") && trimmed.ends_with("</integer>") {
                trimmed
                    .trim_start_matches("<integer>")
                    .trim_end_matches("</integer>")
                    .to_string()
            } else if trimmed == "<true/>" {
                "true".to_string()
            } else if trimmed == "<false/>" {
                "false".to_string()
            } else {
                continue;
            };
            info.insert(key, value);
        }
    }

    if info.is_empty() && !plist.trim().is_empty() {
        return Err(DetectError::ParseError(
            "No keys found in diskutil output".to_string(),
        ));
    }

    Ok(info)
}
