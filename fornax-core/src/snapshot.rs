//! Poll-cycle snapshots.
//!
//! A [`Snapshot`] is the fully decoded state of one controller, captured
//! by one poll cycle. It is immutable once built: the poll loop hands it
//! to consumers behind an `Arc` and nobody ever writes to it again, so it
//! can be read concurrently without locking.

use std::collections::HashMap;

use serde::Serialize;

use crate::decode::Value;
use crate::ControllerId;

/// Immutable, fully-decoded copy of a controller's tracked fields.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    controller: ControllerId,
    seq: u64,
    timestamp_ms: u64,
    values: HashMap<String, Value>,
}

impl Snapshot {
    pub fn controller(&self) -> ControllerId {
        self.controller
    }

    /// Sequence number, strictly increasing per controller.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Capture time, milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }

    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    pub fn i32_value(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(|v| v.as_i32())
    }

    pub fn f32_value(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(|v| v.as_f32())
    }
}

/// Accumulates decoded fields during one poll cycle.
///
/// If the cycle fails mid-way the builder is simply dropped; a partial
/// snapshot is never published.
#[derive(Debug)]
pub struct SnapshotBuilder {
    controller: ControllerId,
    seq: u64,
    timestamp_ms: u64,
    values: HashMap<String, Value>,
}

impl SnapshotBuilder {
    pub fn new(controller: ControllerId, seq: u64, timestamp_ms: u64) -> Self {
        SnapshotBuilder {
            controller,
            seq,
            timestamp_ms,
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            controller: self.controller,
            seq: self.seq,
            timestamp_ms: self.timestamp_ms,
            values: self.values,
        }
    }
}
