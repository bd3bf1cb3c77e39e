use std::fmt::{Debug, Display, Formatter};

use num_traits::{AsPrimitive, Num, NumCast};

use crate::CTypeEnum;

/// Physical kinds of fixed-width elements.
///
/// `Bool` is stored as one byte per element and the temporal kinds as 64-bit integers, matching
/// the layout the native engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PType {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 128-bit integer.
    I128,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Boolean, one byte per element.
    Bool,
    /// Days since the epoch.
    Date,
    /// Nanoseconds since the epoch.
    Datetime,
    /// Nanosecond durations.
    Timedelta,
}

impl PType {
    /// The wire tag of this kind.
    pub const fn c_type(self) -> CTypeEnum {
        match self {
            PType::I8 => CTypeEnum::Int8,
            PType::U8 => CTypeEnum::UInt8,
            PType::I16 => CTypeEnum::Int16,
            PType::U16 => CTypeEnum::UInt16,
            PType::I32 => CTypeEnum::Int32,
            PType::U32 => CTypeEnum::UInt32,
            PType::I64 => CTypeEnum::Int64,
            PType::U64 => CTypeEnum::UInt64,
            PType::I128 => CTypeEnum::Int128,
            PType::F32 => CTypeEnum::Float32,
            PType::F64 => CTypeEnum::Float64,
            PType::Bool => CTypeEnum::Bool,
            PType::Date => CTypeEnum::Date,
            PType::Datetime => CTypeEnum::Datetime,
            PType::Timedelta => CTypeEnum::Timedelta,
        }
    }

    /// The kind carried by a fixed-width wire tag.
    pub const fn from_c_type(ctype: CTypeEnum) -> Option<Self> {
        Some(match ctype {
            CTypeEnum::Int8 => PType::I8,
            CTypeEnum::UInt8 => PType::U8,
            CTypeEnum::Int16 => PType::I16,
            CTypeEnum::UInt16 => PType::U16,
            CTypeEnum::Int32 => PType::I32,
            CTypeEnum::UInt32 => PType::U32,
            CTypeEnum::Int64 => PType::I64,
            CTypeEnum::UInt64 => PType::U64,
            CTypeEnum::Int128 => PType::I128,
            CTypeEnum::Float32 => PType::F32,
            CTypeEnum::Float64 => PType::F64,
            CTypeEnum::Bool => PType::Bool,
            CTypeEnum::Date => PType::Date,
            CTypeEnum::Datetime => PType::Datetime,
            CTypeEnum::Timedelta => PType::Timedelta,
            CTypeEnum::Decimal
            | CTypeEnum::String
            | CTypeEnum::Binary
            | CTypeEnum::List
            | CTypeEnum::Struct => return None,
        })
    }

    /// The kind whose native Rust type stores this kind.
    pub const fn storage(self) -> Self {
        match self {
            PType::Bool => PType::U8,
            PType::Date | PType::Datetime | PType::Timedelta => PType::I64,
            _ => self,
        }
    }

    /// Width in bytes of one element.
    pub const fn byte_width(self) -> usize {
        match self.storage() {
            PType::I8 | PType::U8 => 1,
            PType::I16 | PType::U16 => 2,
            PType::I32 | PType::U32 | PType::F32 => 4,
            PType::I128 => 16,
            _ => 8,
        }
    }

    /// Whether the kind is an integer, including the integer-backed temporal kinds.
    pub const fn is_int(self) -> bool {
        !self.is_float()
    }

    /// Whether the kind is a float.
    pub const fn is_float(self) -> bool {
        matches!(self, PType::F32 | PType::F64)
    }

    /// Whether the kind is signed.
    pub const fn is_signed(self) -> bool {
        !matches!(
            self,
            PType::U8 | PType::U16 | PType::U32 | PType::U64 | PType::Bool
        )
    }

    /// The narrowest signed integer kind able to index `count` categories, keeping `-1` free
    /// for nulls.
    pub fn code_type_for(count: usize) -> Self {
        if count < i8::MAX as usize + 1 {
            PType::I8
        } else if count < i16::MAX as usize + 1 {
            PType::I16
        } else if count < i32::MAX as usize + 1 {
            PType::I32
        } else {
            PType::I64
        }
    }
}

impl Display for PType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PType::I8 => "i8",
            PType::U8 => "u8",
            PType::I16 => "i16",
            PType::U16 => "u16",
            PType::I32 => "i32",
            PType::U32 => "u32",
            PType::I64 => "i64",
            PType::U64 => "u64",
            PType::I128 => "i128",
            PType::F32 => "f32",
            PType::F64 => "f64",
            PType::Bool => "bool",
            PType::Date => "date",
            PType::Datetime => "datetime",
            PType::Timedelta => "timedelta",
        };
        f.write_str(name)
    }
}

/// A Rust type that stores elements of a [`PType`].
pub trait NativePType:
    Send + Sync + Copy + Debug + Display + Default + PartialEq + PartialOrd + Num + NumCast + 'static
{
    /// The storage kind for this type.
    const PTYPE: PType;

    /// Convert to `f64`, losing precision for wide integers.
    fn to_f64_lossy(self) -> f64;

    /// Convert to `i128`, truncating floats.
    fn to_i128_lossy(self) -> i128;
}

macro_rules! native_ptype {
    ($T:ty, $ptype:ident) => {
        impl NativePType for $T {
            const PTYPE: PType = PType::$ptype;

            #[inline]
            fn to_f64_lossy(self) -> f64 {
                AsPrimitive::<f64>::as_(self)
            }

            #[inline]
            fn to_i128_lossy(self) -> i128 {
                AsPrimitive::<i128>::as_(self)
            }
        }
    };
}

native_ptype!(i8, I8);
native_ptype!(u8, U8);
native_ptype!(i16, I16);
native_ptype!(u16, U16);
native_ptype!(i32, I32);
native_ptype!(u32, U32);
native_ptype!(i64, I64);
native_ptype!(u64, U64);
native_ptype!(i128, I128);
native_ptype!(f32, F32);
native_ptype!(f64, F64);

/// Dispatch on the storage type of a [`PType`], binding it to the given type identifier.
#[macro_export]
macro_rules! match_each_native_ptype {
    ($self:expr, | $_:tt $tp:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $tp:ident ) => ( $($body)* )}
        use $crate::PType;
        match $self.storage() {
            PType::I8 => __with__! { i8 },
            PType::U8 => __with__! { u8 },
            PType::I16 => __with__! { i16 },
            PType::U16 => __with__! { u16 },
            PType::I32 => __with__! { i32 },
            PType::U32 => __with__! { u32 },
            PType::I64 => __with__! { i64 },
            PType::U64 => __with__! { u64 },
            PType::I128 => __with__! { i128 },
            PType::F32 => __with__! { f32 },
            PType::F64 => __with__! { f64 },
            PType::Bool | PType::Date | PType::Datetime | PType::Timedelta => unreachable!("storage kinds only"),
        }
    })
}
