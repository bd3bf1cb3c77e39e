use std::fmt::Debug;

use tether_buffer::{Buffer, ByteBuffer};
use tether_dtype::{DType, NativePType, PType, match_each_native_ptype};
use tether_error::{TetherResult, tether_bail, tether_panic};

/// Fixed-width values with no validity, the "numpy-style" array.
#[derive(Clone, Debug)]
pub struct PrimitiveArray {
    ptype: PType,
    buffer: ByteBuffer,
}

impl PrimitiveArray {
    /// Wrap a typed buffer. The kind is the storage kind of `T`.
    pub fn new<T: NativePType>(buffer: impl Into<Buffer<T>>) -> Self {
        Self {
            ptype: T::PTYPE,
            buffer: buffer.into().into_byte_buffer(),
        }
    }

    /// Wrap bytes holding elements of `ptype`.
    pub fn try_from_byte_buffer(buffer: ByteBuffer, ptype: PType) -> TetherResult<Self> {
        if buffer.len() % ptype.byte_width() != 0 {
            tether_bail!(
                "{} bytes do not hold a whole number of {} values",
                buffer.len(),
                ptype
            );
        }
        Ok(Self { ptype, buffer })
    }

    /// Reinterpret the values as a temporal or boolean kind sharing the same storage.
    pub fn with_ptype(self, ptype: PType) -> TetherResult<Self> {
        if ptype.storage() != self.ptype.storage() {
            tether_bail!(MismatchedTypes: self.ptype.storage(), ptype.storage());
        }
        Ok(Self {
            ptype,
            buffer: self.buffer,
        })
    }

    /// One byte per boolean.
    pub fn from_bools(values: impl IntoIterator<Item = bool>) -> Self {
        let bytes: Buffer<u8> = values.into_iter().map(u8::from).collect();
        Self {
            ptype: PType::Bool,
            buffer: bytes,
        }
    }

    /// The element kind.
    pub fn ptype(&self) -> PType {
        self.ptype
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.buffer.len() / self.ptype.byte_width()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The raw value bytes.
    pub fn byte_buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Typed view of the values.
    ///
    /// ## Panics
    ///
    /// Panics if `T` is not the storage type of this array's kind.
    pub fn buffer<T: NativePType>(&self) -> Buffer<T> {
        if T::PTYPE != self.ptype.storage() {
            tether_panic!(
                "Attempted to get buffer of type {} from array of type {}",
                T::PTYPE,
                self.ptype
            )
        }
        Buffer::from_byte_buffer(self.buffer.clone())
    }

    /// Value at `index` widened to `f64`.
    pub fn value_f64(&self, index: usize) -> f64 {
        match_each_native_ptype!(self.ptype, |$T| self.buffer::<$T>()[index].to_f64_lossy())
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::Primitive(self.ptype)
    }
}

impl PartialEq for PrimitiveArray {
    fn eq(&self, other: &Self) -> bool {
        self.ptype == other.ptype && self.buffer == other.buffer
    }
}

impl<T: NativePType> From<Vec<T>> for PrimitiveArray {
    fn from(values: Vec<T>) -> Self {
        Self::new(Buffer::from_vec(values))
    }
}
