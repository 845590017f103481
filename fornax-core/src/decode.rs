//! Pure decoding of raw protocol data into typed values.
//!
//! Decoding performs no I/O: the caller reads the coil bits or register
//! words for one field and hands them in here.
//!
//! # 32-bit word order
//!
//! A 32-bit value (`Int32`, `Float32`) is stored in two consecutive
//! holding registers with the MOST SIGNIFICANT word at the LOWER address:
//!
//! ```text
//! value = registers[addr] << 16 | registers[addr + 1]
//! ```
//!
//! This order is fixed for the whole system; [`combine_words`] and
//! [`split_words`] are the only places that know about it.

use serde::Serialize;

use crate::error::CoreError;
use crate::registers::FieldKind;

/// Decoded value of one mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Float32(f32),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Bool(_) => FieldKind::Bool,
            Value::Int16(_) => FieldKind::Int16,
            Value::Int32(_) => FieldKind::Int32,
            Value::Float32(_) => FieldKind::Float32,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Value::Int16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(v) => Some(*v),
            _ => None,
        }
    }
}

/// Raw data read for one field, before decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawField<'a> {
    Coils(&'a [bool]),
    Registers(&'a [u16]),
}

/// Combine a register pair into one 32-bit word, most significant word
/// first.
pub fn combine_words(high: u16, low: u16) -> u32 {
    (high as u32) << 16 | low as u32
}

/// Split a 32-bit word into the register pair it is stored as.
pub fn split_words(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Decode the raw data for one field according to its kind.
pub fn decode_field(kind: FieldKind, raw: RawField) -> Result<Value, CoreError> {
    match (kind, raw) {
        (FieldKind::Bool, RawField::Coils(bits)) => match bits {
            [bit] => Ok(Value::Bool(*bit)),
            _ => Err(CoreError::WordCount {
                kind,
                expected: 1,
                got: bits.len(),
            }),
        },
        (FieldKind::Int16, RawField::Registers(words)) => match words {
            [word] => Ok(Value::Int16(*word as i16)),
            _ => Err(CoreError::WordCount {
                kind,
                expected: 1,
                got: words.len(),
            }),
        },
        (FieldKind::Int32, RawField::Registers(words)) => match words {
            [high, low] => Ok(Value::Int32(combine_words(*high, *low) as i32)),
            _ => Err(CoreError::WordCount {
                kind,
                expected: 2,
                got: words.len(),
            }),
        },
        (FieldKind::Float32, RawField::Registers(words)) => match words {
            [high, low] => Ok(Value::Float32(f32::from_bits(combine_words(*high, *low)))),
            _ => Err(CoreError::WordCount {
                kind,
                expected: 2,
                got: words.len(),
            }),
        },
        (kind, RawField::Coils(_)) => Err(CoreError::WrongArea {
            kind,
            area: "coil",
        }),
        (kind, RawField::Registers(_)) => Err(CoreError::WrongArea {
            kind,
            area: "register",
        }),
    }
}

/// Encode a 32-bit integer as the register pair it is written as.
pub fn encode_i32(value: i32) -> [u16; 2] {
    let (high, low) = split_words(value as u32);
    [high, low]
}

/// Encode a float as the register pair it is written as.
pub fn encode_f32(value: f32) -> [u16; 2] {
    let (high, low) = split_words(value.to_bits());
    [high, low]
}
