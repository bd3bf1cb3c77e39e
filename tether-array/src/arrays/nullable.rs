use tether_buffer::{Bitmap, Buffer, ByteBuffer};
use tether_dtype::{DType, NativePType, PType, match_each_native_ptype};
use tether_error::{TetherResult, tether_bail};

use crate::arrays::PrimitiveArray;

/// Fixed-width values with a validity bitmap, the "masked" array.
#[derive(Clone, Debug)]
pub struct NullableArray {
    values: PrimitiveArray,
    validity: Bitmap,
}

impl NullableArray {
    /// Pair values with a bitmap of the same length.
    pub fn try_new(values: PrimitiveArray, validity: Bitmap) -> TetherResult<Self> {
        if values.len() != validity.len() {
            tether_bail!(
                "values length {} does not match validity length {}",
                values.len(),
                validity.len()
            );
        }
        Ok(Self { values, validity })
    }

    /// Build from optional values, storing `T::default()` under nulls.
    pub fn from_option_iter<T: NativePType, I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let (values, validity): (Vec<T>, Vec<bool>) = iter
            .into_iter()
            .map(|v| (v.unwrap_or_default(), v.is_some()))
            .unzip();
        Self {
            values: PrimitiveArray::from(values),
            validity: validity.into_iter().collect(),
        }
    }

    /// The element kind.
    pub fn ptype(&self) -> PType {
        self.values.ptype()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The values, including whatever is stored under nulls.
    pub fn values(&self) -> &PrimitiveArray {
        &self.values
    }

    /// The validity bitmap.
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// Typed values.
    pub fn buffer<T: NativePType>(&self) -> Buffer<T> {
        self.values.buffer::<T>()
    }

    /// The raw value bytes.
    pub fn byte_buffer(&self) -> &ByteBuffer {
        self.values.byte_buffer()
    }

    /// Whether row `index` is valid.
    pub fn is_valid(&self, index: usize) -> bool {
        self.validity.is_valid(index)
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::nullable(self.ptype())
    }
}

impl PartialEq for NullableArray {
    fn eq(&self, other: &Self) -> bool {
        if self.ptype() != other.ptype() || self.validity != other.validity {
            return false;
        }
        match_each_native_ptype!(self.ptype(), |$T| {
            let (lhs, rhs) = (self.buffer::<$T>(), other.buffer::<$T>());
            (0..self.len()).all(|i| !self.is_valid(i) || lhs[i] == rhs[i])
        })
    }
}
