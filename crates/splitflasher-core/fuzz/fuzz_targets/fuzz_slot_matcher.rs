//! Fuzz test for slot file selection
//!
//! Tests that image name matching and slot selection never panic and never
//! assign one file to both halves.

#![no_main]

use libfuzzer_sys::fuzz_target;
use splitflasher_core::{Candidate, Slot, matches_slot, select_slot_files};
use std::path::PathBuf;

fuzz_target!(|data: &str| {
    let candidates: Vec<Candidate> = data
        .lines()
        .take(16)
        .enumerate()
        .map(|(i, name)| Candidate {
            path: PathBuf::from(format!("/tmp/extracted/{}/{}", i, name)),
            name: name.to_string(),
        })
        .collect();

    for candidate in &candidates {
        let _ = matches_slot(&candidate.name, Slot::Right);
        let _ = matches_slot(&candidate.name, Slot::Left);
    }

    let total = candidates.len();
    if let Ok((chosen, leftovers)) = select_slot_files(candidates) {
        assert_ne!(chosen.right.path, chosen.left.path);
        assert!(matches_slot(&chosen.right.name, Slot::Right));
        assert!(matches_slot(&chosen.left.name, Slot::Left));
        assert_eq!(leftovers.len() + 2, total);
    }
});
