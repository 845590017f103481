//! Register Maps
//!
//! A [`RegisterMap`] is the static field table for one kind of controller:
//! each [`FieldDescriptor`] names a field, gives its offset inside the
//! device block and its decoded type. Several identical controllers can
//! share one addressing scheme, in which case each device occupies one
//! stride-sized block:
//!
//! ```text
//! address = base + device_index * stride + field.offset
//! ```
//!
//! Maps are validated on construction: field spans may not overlap and
//! must fit inside the stride, so a bad table is rejected before any poll
//! loop ever starts.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Decoded type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// One discrete coil bit.
    Bool,
    /// One 16-bit holding register, signed.
    Int16,
    /// Two consecutive holding registers, signed.
    Int32,
    /// Two consecutive holding registers, IEEE 754 single precision.
    Float32,
}

impl FieldKind {
    /// Number of consecutive addresses the field occupies.
    pub fn span(&self) -> u16 {
        match self {
            FieldKind::Bool | FieldKind::Int16 => 1,
            FieldKind::Int32 | FieldKind::Float32 => 2,
        }
    }

    /// Whether the field lives in the coil area rather than the holding
    /// register area.
    pub fn is_coil(&self) -> bool {
        matches!(self, FieldKind::Bool)
    }
}

/// One entry of a register map. Immutable, defined once per controller
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub offset: u16,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    const fn new(name: &'static str, offset: u16, kind: FieldKind) -> Self {
        FieldDescriptor { name, offset, kind }
    }
}

/// Static field table plus addressing parameters for one controller kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    base: u16,
    stride: u16,
    fields: Vec<FieldDescriptor>,
}

impl RegisterMap {
    /// Build a map, rejecting tables with duplicate names, overlapping
    /// field spans or fields reaching past the device stride.
    pub fn new(
        base: u16,
        stride: u16,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self, CoreError> {
        for (i, field) in fields.iter().enumerate() {
            let end = field.offset as u32 + field.kind.span() as u32;
            if end > stride as u32 {
                return Err(CoreError::FieldOutsideStride {
                    name: field.name.to_string(),
                    end,
                    stride,
                });
            }
            for other in &fields[..i] {
                if other.name == field.name {
                    return Err(CoreError::DuplicateField(field.name.to_string()));
                }
                let other_end = other.offset + other.kind.span();
                if field.offset < other_end && other.offset < field.offset + field.kind.span() {
                    return Err(CoreError::OverlappingFields {
                        first: other.name.to_string(),
                        second: field.name.to_string(),
                        offset: field.offset.max(other.offset),
                    });
                }
            }
        }
        Ok(RegisterMap {
            base,
            stride,
            fields,
        })
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn stride(&self) -> u16 {
        self.stride
    }

    /// Highest device index whose block still fits in the 16-bit address
    /// space. Indices beyond it would wrap around during addressing.
    pub fn max_device_index(&self) -> u16 {
        if self.stride == 0 {
            return u16::MAX;
        }
        let blocks = (u16::MAX as u32 - self.base as u32 + 1) / self.stride as u32;
        (blocks.saturating_sub(1)).min(u16::MAX as u32) as u16
    }

    /// Absolute address of `field` on device `device_index`.
    ///
    /// Callers must have checked the index against
    /// [`max_device_index`](Self::max_device_index); that happens once,
    /// at configuration time.
    pub fn address(&self, device_index: u16, field: &FieldDescriptor) -> u16 {
        self.base + device_index * self.stride + field.offset
    }

    /// Absolute address of the named field on device `device_index`.
    pub fn address_of(&self, device_index: u16, name: &str) -> Result<u16, CoreError> {
        let field = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CoreError::UnknownField(name.to_string()))?;
        Ok(self.address(device_index, field))
    }
}

/// Which builtin register map a controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// The motion controller: door/cylinder/presence coils plus five
    /// axes with 32-bit position and speed registers.
    Motion,
    /// A furnace controller: process measurements, all Float32, one
    /// 100-register block per furnace tube.
    Furnace,
}

impl ControllerKind {
    pub fn register_map(&self) -> Result<RegisterMap, CoreError> {
        match self {
            ControllerKind::Motion => motion_map(),
            ControllerKind::Furnace => furnace_map(),
        }
    }
}

/// Well-known field names, shared between the poll path (transition
/// detection) and the command path (motion guards).
pub mod fields {
    pub const CARRIAGE_PRESENT: &str = "carriage_present";
    pub const CARRIAGE_HAS_MATERIAL: &str = "carriage_has_material";

    pub const ROBOT_HORIZONTAL1_SPEED: &str = "robot_horizontal1_speed";
    pub const ROBOT_HORIZONTAL2_SPEED: &str = "robot_horizontal2_speed";
    pub const ROBOT_VERTICAL_SPEED: &str = "robot_vertical_speed";
    pub const CLAMP_HORIZONTAL_SPEED: &str = "clamp_horizontal_speed";
    pub const CLAMP_VERTICAL_SPEED: &str = "clamp_vertical_speed";
}

use FieldKind::{Bool, Float32, Int32};

const MOTION_FIELDS: [FieldDescriptor; 23] = [
    FieldDescriptor::new("door1_lock", 0, Bool),
    FieldDescriptor::new("door2_lock", 1, Bool),
    FieldDescriptor::new("furnace_vertical_cylinder", 2, Bool),
    FieldDescriptor::new("furnace_horizontal_cylinder", 3, Bool),
    FieldDescriptor::new("storage1_has_material", 4, Bool),
    FieldDescriptor::new("storage2_has_material", 5, Bool),
    FieldDescriptor::new("clamp_has_material", 6, Bool),
    FieldDescriptor::new(fields::CARRIAGE_PRESENT, 7, Bool),
    FieldDescriptor::new(fields::CARRIAGE_HAS_MATERIAL, 8, Bool),
    FieldDescriptor::new("robot_horizontal1_forward_limit", 9, Bool),
    FieldDescriptor::new("robot_horizontal1_backward_limit", 10, Bool),
    FieldDescriptor::new("robot_horizontal1_origin_limit", 11, Bool),
    FieldDescriptor::new("robot_horizontal1_position", 12, Int32),
    FieldDescriptor::new(fields::ROBOT_HORIZONTAL1_SPEED, 14, Int32),
    FieldDescriptor::new("robot_horizontal2_position", 16, Int32),
    FieldDescriptor::new(fields::ROBOT_HORIZONTAL2_SPEED, 18, Int32),
    FieldDescriptor::new("robot_vertical_position", 20, Int32),
    FieldDescriptor::new(fields::ROBOT_VERTICAL_SPEED, 22, Int32),
    FieldDescriptor::new("clamp_horizontal_position", 24, Int32),
    FieldDescriptor::new(fields::CLAMP_HORIZONTAL_SPEED, 26, Int32),
    FieldDescriptor::new("clamp_vertical_position", 28, Int32),
    FieldDescriptor::new(fields::CLAMP_VERTICAL_SPEED, 30, Int32),
    FieldDescriptor::new("furnace_status", 32, Bool),
];

const FURNACE_FIELDS: [FieldDescriptor; 12] = [
    FieldDescriptor::new("temperature1", 1, Float32),
    FieldDescriptor::new("temperature2", 3, Float32),
    FieldDescriptor::new("temperature3", 5, Float32),
    FieldDescriptor::new("temperature4", 7, Float32),
    FieldDescriptor::new("silane_flow", 9, Float32),
    FieldDescriptor::new("nitrogen_flow", 11, Float32),
    FieldDescriptor::new("pressure", 13, Float32),
    FieldDescriptor::new("power", 15, Float32),
    FieldDescriptor::new("current", 17, Float32),
    FieldDescriptor::new("voltage", 19, Float32),
    FieldDescriptor::new("pulse_frequency", 21, Float32),
    FieldDescriptor::new("pulse_voltage", 23, Float32),
];

/// Field table for the single motion controller.
pub fn motion_map() -> Result<RegisterMap, CoreError> {
    RegisterMap::new(0, 100, MOTION_FIELDS.to_vec())
}

/// Field table for the furnace controllers. Each tube occupies one
/// 100-register block, so tube `n` starts at address `n * 100`.
pub fn furnace_map() -> Result<RegisterMap, CoreError> {
    RegisterMap::new(0, 100, FURNACE_FIELDS.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_maps_validate() {
        assert!(motion_map().is_ok());
        assert!(furnace_map().is_ok());
    }

    #[test]
    fn test_stride_addressing() {
        let map = furnace_map().unwrap();

        // temperature1 on tube 2: 0 + 2 * 100 + 1
        assert_eq!(map.address_of(2, "temperature1").unwrap(), 201);
        assert_eq!(map.address_of(0, "temperature1").unwrap(), 1);
        assert_eq!(map.address_of(5, "pulse_voltage").unwrap(), 523);
    }

    #[test]
    fn test_unknown_field() {
        let map = furnace_map().unwrap();
        assert_eq!(
            map.address_of(0, "no_such_field"),
            Err(CoreError::UnknownField("no_such_field".to_string()))
        );
    }

    #[test]
    fn test_addresses_never_collide() {
        // Spans of distinct fields never overlap, neither within one
        // device block nor across device indices.
        for map in [motion_map().unwrap(), furnace_map().unwrap()] {
            let mut spans: Vec<(u16, u16, &str)> = Vec::new();
            for device in 0..6 {
                for field in map.fields() {
                    let start = map.address(device, field);
                    spans.push((start, start + field.kind.span(), field.name));
                }
            }
            for (i, a) in spans.iter().enumerate() {
                for b in &spans[..i] {
                    assert!(
                        a.1 <= b.0 || b.1 <= a.0,
                        "{} [{}, {}) overlaps {} [{}, {})",
                        a.2,
                        a.0,
                        a.1,
                        b.2,
                        b.0,
                        b.1
                    );
                }
            }
        }
    }

    #[test]
    fn test_max_device_index_stays_in_address_space() {
        let map = furnace_map().unwrap();
        // 655 blocks of 100 fit under 65536.
        assert_eq!(map.max_device_index(), 654);
        let last = map.fields().last().unwrap();
        let top = map.address(map.max_device_index(), last);
        assert!(top as u32 + last.kind.span() as u32 <= u16::MAX as u32 + 1);
    }

    #[test]
    fn test_overlap_rejected() {
        let result = RegisterMap::new(
            0,
            100,
            vec![
                FieldDescriptor::new("position", 10, Int32),
                FieldDescriptor::new("speed", 11, Int32),
            ],
        );
        assert_eq!(
            result,
            Err(CoreError::OverlappingFields {
                first: "position".to_string(),
                second: "speed".to_string(),
                offset: 11,
            })
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = RegisterMap::new(
            0,
            100,
            vec![
                FieldDescriptor::new("pressure", 0, Float32),
                FieldDescriptor::new("pressure", 2, Float32),
            ],
        );
        assert_eq!(
            result,
            Err(CoreError::DuplicateField("pressure".to_string()))
        );
    }

    #[test]
    fn test_field_past_stride_rejected() {
        let result = RegisterMap::new(
            0,
            100,
            vec![FieldDescriptor::new("tail", 99, Int32)],
        );
        assert_eq!(
            result,
            Err(CoreError::FieldOutsideStride {
                name: "tail".to_string(),
                end: 101,
                stride: 100,
            })
        );
    }

    #[test]
    fn test_coil_and_register_spans() {
        assert_eq!(FieldKind::Bool.span(), 1);
        assert_eq!(FieldKind::Int16.span(), 1);
        assert_eq!(FieldKind::Int32.span(), 2);
        assert_eq!(FieldKind::Float32.span(), 2);
        assert!(FieldKind::Bool.is_coil());
        assert!(!FieldKind::Float32.is_coil());
    }
}
