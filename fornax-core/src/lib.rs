//! Platform-independent core for the Fornax furnace-line gateway.
//!
//! This crate holds everything that can be expressed without I/O: the
//! per-controller register maps and their stride addressing, pure decoding
//! of raw register words into typed values, immutable snapshots of one
//! poll cycle, and the carriage/material transition detector.
//!
//! The companion `fornax-server` crate supplies the Modbus TCP client,
//! the poll loops and the command path on top of these types.

pub mod decode;
pub mod error;
pub mod registers;
pub mod snapshot;
pub mod transition;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use decode::{combine_words, decode_field, split_words, RawField, Value};
pub use error::CoreError;
pub use registers::{ControllerKind, FieldDescriptor, FieldKind, RegisterMap};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use transition::{TransitionDetector, TransitionEvent, TransitionKind};

/// Identifies one controller on the line.
///
/// Ids are assigned once at startup, in settings order, and are stable for
/// the lifetime of the process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ControllerId(pub u8);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "plc-{}", self.0)
    }
}
