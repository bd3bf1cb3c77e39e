use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Integer type tags shared with the native engine.
///
/// The discriminants are part of the native call protocol and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum CTypeEnum {
    /// Signed 8-bit integer.
    Int8 = 0,
    /// Unsigned 8-bit integer.
    UInt8 = 1,
    /// Signed 32-bit integer.
    Int32 = 2,
    /// Unsigned 32-bit integer.
    UInt32 = 3,
    /// Signed 64-bit integer.
    Int64 = 4,
    /// 32-bit float.
    Float32 = 5,
    /// 64-bit float.
    Float64 = 6,
    /// Unsigned 64-bit integer.
    UInt64 = 7,
    /// Signed 16-bit integer.
    Int16 = 8,
    /// Unsigned 16-bit integer.
    UInt16 = 9,
    /// Variable-length UTF-8 strings.
    String = 10,
    /// One byte per boolean.
    Bool = 11,
    /// 128-bit decimal, followed on the wire by precision and scale.
    Decimal = 12,
    /// Days since the epoch, stored as 64-bit integers.
    Date = 13,
    /// Nanoseconds since the epoch, stored as 64-bit integers.
    Datetime = 14,
    /// Nanosecond durations, stored as 64-bit integers.
    Timedelta = 15,
    /// Signed 128-bit integer.
    Int128 = 16,
    /// Variable-length list container.
    List = 18,
    /// Struct container, followed on the wire by its field count.
    Struct = 19,
    /// Variable-length binary.
    Binary = 20,
}

impl CTypeEnum {
    /// Width in bytes of one fixed-width element, or `None` for variable-length and container tags.
    pub const fn byte_width(self) -> Option<usize> {
        match self {
            CTypeEnum::Int8 | CTypeEnum::UInt8 | CTypeEnum::Bool => Some(1),
            CTypeEnum::Int16 | CTypeEnum::UInt16 => Some(2),
            CTypeEnum::Int32 | CTypeEnum::UInt32 | CTypeEnum::Float32 => Some(4),
            CTypeEnum::Int64
            | CTypeEnum::UInt64
            | CTypeEnum::Float64
            | CTypeEnum::Date
            | CTypeEnum::Datetime
            | CTypeEnum::Timedelta => Some(8),
            CTypeEnum::Int128 | CTypeEnum::Decimal => Some(16),
            CTypeEnum::String | CTypeEnum::Binary | CTypeEnum::List | CTypeEnum::Struct => None,
        }
    }

    /// Whether the tag describes a container whose children follow it on the wire.
    pub const fn is_container(self) -> bool {
        matches!(self, CTypeEnum::List | CTypeEnum::Struct)
    }
}

impl Display for CTypeEnum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, i32::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CTypeEnum::Int8, 0)]
    #[case(CTypeEnum::UInt64, 7)]
    #[case(CTypeEnum::String, 10)]
    #[case(CTypeEnum::Decimal, 12)]
    #[case(CTypeEnum::Int128, 16)]
    #[case(CTypeEnum::List, 18)]
    #[case(CTypeEnum::Struct, 19)]
    #[case(CTypeEnum::Binary, 20)]
    fn wire_codes_are_stable(#[case] ctype: CTypeEnum, #[case] code: i32) {
        assert_eq!(i32::from(ctype), code);
        assert_eq!(CTypeEnum::try_from(code).unwrap(), ctype);
    }

    #[test]
    fn gap_is_rejected() {
        assert!(CTypeEnum::try_from(17).is_err());
    }
}
