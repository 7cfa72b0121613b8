//! Fuzz test for volume classification
//!
//! Tests that classifying arbitrary paths never panics and never accepts
//! anything outside the mount root.

#![no_main]

use libfuzzer_sys::fuzz_target;
use splitflasher_detect::{NullResolver, VolumeClassifier, DEFAULT_TARGET_LABELS};
use std::path::Path;

fuzz_target!(|data: &str| {
    let classifier = VolumeClassifier::new(
        "/nonexistent-fuzz-root",
        DEFAULT_TARGET_LABELS.iter().copied(),
        Box::new(NullResolver),
    );

    let path = Path::new(data);
    if classifier.is_target(path) {
        assert_eq!(path.parent(), Some(Path::new("/nonexistent-fuzz-root")));
    }
});
