//! Fuzz test for chunk size parsing
//!
//! Tests that size parsing handles arbitrary inputs safely.

#![no_main]

use libfuzzer_sys::fuzz_target;

use splitflasher_core::settings::parse_size;

fuzz_target!(|data: &str| {
    // Should never panic, only return Ok/Err
    if let Ok(size) = parse_size(data) {
        assert!(size > 0, "Size should be positive");
    }

    // Test with common edge case patterns appended
    for suffix in ["", "B", "K", "KB", "M", "MB", "k", "m", "b"] {
        let test_input = format!("{}{}", data.trim(), suffix);
        let _ = parse_size(&test_input);
    }

    // Test with leading/trailing whitespace
    let whitespace_input = format!("  {}  ", data);
    let _ = parse_size(&whitespace_input);
});
