//! Fuzz test for `diskutil info -plist` parsing
//!
//! Tests that extracting the device identifier handles arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let info = fuzz_parse_disk_info(data);

    if let Some(id) = info.get("DeviceIdentifier") {
        // Values never carry the surrounding tags
        assert!(!id.starts_with("<string>"));
    }
});

/// Mirror of the key/value plist scan used by the diskutil resolver
fn fuzz_parse_disk_info(plist: &str) -> std::collections::HashMap<String, String> {
    let mut info = std::collections::HashMap::new();
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

    info
}
