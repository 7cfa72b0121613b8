//! Fuzz test for settings TOML parsing
//!
//! Tests that settings deserialization and conversion handle arbitrary
//! TOML safely.

#![no_main]

use libfuzzer_sys::fuzz_target;
use splitflasher_core::{CopySettings, SessionSettings, Settings, VolumeSettings};

fuzz_target!(|data: &str| {
    let result: Result<Settings, _> = toml::from_str(data);

    if let Ok(settings) = result {
        // Should be able to serialize without panicking
        let _ = toml::to_string(&settings);
        let _ = toml::to_string_pretty(&settings);

        // Conversion validates instead of panicking
        if let Ok(config) = settings.to_config() {
            assert!(config.copy.max_attempts > 0);
            assert!(!config.labels.is_empty());
        }
    }

    // Test parsing individual sections
    let _: Result<VolumeSettings, _> = toml::from_str(data);
    let _: Result<CopySettings, _> = toml::from_str(data);
    let _: Result<SessionSettings, _> = toml::from_str(data);

    // Test with table wrappers (how they appear in full config)
    for section in ["volumes", "copy", "session"] {
        let wrapped = format!("[{}]\n{}", section, data);
        if let Ok(settings) = toml::from_str::<Settings>(&wrapped) {
            let _ = settings.to_config();
        }
    }
});
