use thiserror::Error;

use crate::registers::FieldKind;

/// Errors raised by register map validation and field decoding.
///
/// Map errors surface once, at startup, before any poll loop runs.
/// Decode errors indicate a word-count or area mismatch between a field
/// descriptor and the raw data read for it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("duplicate field name {0:?}")]
    DuplicateField(String),

    #[error("fields {first:?} and {second:?} overlap at offset {offset}")]
    OverlappingFields {
        first: String,
        second: String,
        offset: u16,
    },

    #[error("field {name:?} ends at offset {end}, past the device stride {stride}")]
    FieldOutsideStride { name: String, end: u32, stride: u16 },

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("{kind:?} field decoded from {got} words, expected {expected}")]
    WordCount {
        kind: FieldKind,
        expected: usize,
        got: usize,
    },

    #[error("{kind:?} field cannot be decoded from {area} data")]
    WrongArea {
        kind: FieldKind,
        area: &'static str,
    },
}
