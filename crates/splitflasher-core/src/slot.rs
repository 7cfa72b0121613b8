//! Firmware slots
//!
//! A split keyboard has two halves, each flashed with its own image. The
//! right half is always flashed first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two firmware destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Right half, flashed first
    Right,
    /// Left half
    Left,
}

impl Slot {
    /// Slots in flashing order
    pub const ORDER: [Slot; 2] = [Slot::Right, Slot::Left];

    /// Lowercase name used to match image file names (`right` / `left`)
    pub fn name(self) -> &'static str {
        match self {
            Slot::Right => "right",
            Slot::Left => "left",
        }
    }

    /// Human label for the start of a sentence
    pub fn title(self) -> &'static str {
        match self {
            Slot::Right => "Right half",
            Slot::Left => "Left half",
        }
    }

    /// Human label (`right half` / `left half`)
    pub fn label(self) -> &'static str {
        match self {
            Slot::Right => "right half",
            Slot::Left => "left half",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-slot state as presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Nothing loaded
    Idle,
    /// Firmware loaded for this slot
    Ready,
    /// Waiting for the device to be connected
    Waiting,
    /// Copy in progress
    Copying,
    /// Copy finished
    Success,
    /// Copy failed
    Error,
}

/// A value for each slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMap<T> {
    /// Value for the right half
    pub right: T,
    /// Value for the left half
    pub left: T,
}

impl<T> SlotMap<T> {
    /// Borrow the value for `slot`
    pub fn get(&self, slot: Slot) -> &T {
        match slot {
            Slot::Right => &self.right,
            Slot::Left => &self.left,
        }
    }

    /// Iterate in flashing order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        Slot::ORDER.into_iter().map(move |slot| (slot, self.get(slot)))
    }
}
