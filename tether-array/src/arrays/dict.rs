use std::sync::Arc;

use tether_dtype::{DType, PType};
use tether_error::{TetherResult, tether_bail};

use crate::Array;
use crate::arrays::NullableArray;

/// Dictionary-encoded strings: nullable `i32` indices into a shared values array.
///
/// The values are reference counted so that many dictionary arrays, and the native handles
/// borrowing them, can share one copy.
#[derive(Clone, Debug)]
pub struct DictArray {
    indices: NullableArray,
    values: Arc<Array>,
    global: bool,
}

impl DictArray {
    /// Assemble a dictionary array, checking every valid index is in range.
    ///
    /// `global` marks values that are shared by every worker holding this column. It is carried
    /// through marshaling verbatim and never relied upon for correctness.
    pub fn try_new(indices: NullableArray, values: Arc<Array>, global: bool) -> TetherResult<Self> {
        if indices.ptype() != PType::I32 {
            tether_bail!(MismatchedTypes: PType::I32, indices.ptype());
        }
        if !matches!(values.as_ref(), Array::VarBin(_)) {
            tether_bail!(MismatchedTypes: "utf8 or binary", values.dtype());
        }
        let codes = indices.buffer::<i32>();
        for (i, &code) in codes.iter().enumerate() {
            if indices.is_valid(i) && (code < 0 || code as usize >= values.len()) {
                tether_bail!(OutOfBounds: code as usize, 0, values.len());
            }
        }
        Ok(Self {
            indices,
            values,
            global,
        })
    }

    /// The indices.
    pub fn indices(&self) -> &NullableArray {
        &self.indices
    }

    /// The shared values.
    pub fn values(&self) -> &Arc<Array> {
        &self.values
    }

    /// Whether the values are a global dictionary.
    pub fn has_global_dictionary(&self) -> bool {
        self.global
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The decoded bytes of element `index`, or `None` if it is null.
    pub fn bytes_at(&self, index: usize) -> Option<&[u8]> {
        let Array::VarBin(values) = self.values.as_ref() else {
            return None;
        };
        if !self.indices.is_valid(index) {
            return None;
        }
        values.bytes_at(self.indices.buffer::<i32>()[index] as usize)
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::dictionary(self.indices.dtype(), self.values.dtype())
    }
}

impl PartialEq for DictArray {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.bytes_at(i) == other.bytes_at(i))
    }
}
