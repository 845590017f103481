//! Carriage/material transition detection.
//!
//! Each cycle samples two booleans from the motion controller: whether a
//! carriage is present at the load station and whether it carries
//! material. They form a 2-bit code (`presence << 1 | material`), and
//! four specific edges of that code are domain events:
//!
//! | From | To | Event |
//! |------|----|-------|
//! | 00 | 11 | carriage arrived with material |
//! | 11 | 10 | material removed |
//! | 10 | 11 | material returned |
//! | 11 | 00 | carriage departed empty |
//!
//! Every other edge (through `01`, or any jump that skips an intermediate
//! code) emits nothing. That gap is inherited from the plant's original
//! control program and is kept as-is: downstream record-keeping depends
//! on exactly these four events.
//!
//! The detector keeps a single previous code, so it must see every
//! snapshot of its controller in order - a skipped snapshot silently
//! loses edges.

use serde::Serialize;

use crate::ControllerId;

/// One of the four defined carriage/material edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    CarriageArrivedWithMaterial,
    MaterialRemoved,
    MaterialReturned,
    CarriageDepartedEmpty,
}

/// A detected edge, consumed once by subscribers; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub controller: ControllerId,
    pub kind: TransitionKind,
    pub timestamp_ms: u64,
}

/// Tracks the composite carriage code for one controller.
///
/// O(1) state: exactly one previous code is retained. A fresh detector
/// starts from `00` (no carriage, no material), matching a line that
/// comes up empty.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    last: u8,
}

impl TransitionDetector {
    pub fn new() -> Self {
        TransitionDetector::default()
    }

    /// Detector primed with a known previous sample. A restarted loop
    /// resumes from the last published snapshot this way, so a steady
    /// code does not refire its arrival edge.
    pub fn primed(presence: bool, material: bool) -> Self {
        TransitionDetector {
            last: (presence as u8) << 1 | material as u8,
        }
    }

    /// Feed one sample; returns the event for a defined edge, at most one
    /// per sample.
    pub fn observe(&mut self, presence: bool, material: bool) -> Option<TransitionKind> {
        let code = (presence as u8) << 1 | material as u8;
        let prev = self.last;
        self.last = code;
        match (prev, code) {
            (0b00, 0b11) => Some(TransitionKind::CarriageArrivedWithMaterial),
            (0b11, 0b10) => Some(TransitionKind::MaterialRemoved),
            (0b10, 0b11) => Some(TransitionKind::MaterialReturned),
            (0b11, 0b00) => Some(TransitionKind::CarriageDepartedEmpty),
            _ => None,
        }
    }
}
