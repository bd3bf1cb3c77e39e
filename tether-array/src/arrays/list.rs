use std::sync::Arc;

use tether_buffer::{Bitmap, Buffer};
use tether_dtype::DType;
use tether_error::{TetherResult, tether_bail};

use crate::Array;

/// Variable-length lists of a child array.
///
/// Row `i` holds `elements[offsets[i]..offsets[i + 1]]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ListArray {
    offsets: Buffer<u64>,
    validity: Bitmap,
    elements: Arc<Array>,
}

impl ListArray {
    /// Validate offsets against the element array and assemble a list array.
    pub fn try_new(offsets: Buffer<u64>, validity: Bitmap, elements: Array) -> TetherResult<Self> {
        let Some(&last) = offsets.last() else {
            tether_bail!("offsets must hold at least one entry");
        };
        if offsets.len() - 1 != validity.len() {
            tether_bail!(
                "{} offsets cannot describe {} rows",
                offsets.len(),
                validity.len()
            );
        }
        if !offsets.is_sorted() {
            tether_bail!("offsets must be non-decreasing");
        }
        if last as usize > elements.len() {
            tether_bail!(OutOfBounds: last as usize, 0, elements.len());
        }
        Ok(Self {
            offsets,
            validity,
            elements: Arc::new(elements),
        })
    }

    /// Build a list array from per-row element counts, `None` marking a null row.
    pub fn from_lengths(
        lengths: impl IntoIterator<Item = Option<usize>>,
        elements: Array,
    ) -> TetherResult<Self> {
        let mut offsets = vec![0u64];
        let mut validity = Vec::new();
        for len in lengths {
            let end = offsets[offsets.len() - 1] + len.unwrap_or(0) as u64;
            offsets.push(end);
            validity.push(len.is_some());
        }
        Self::try_new(
            Buffer::from_vec(offsets),
            validity.into_iter().collect(),
            elements,
        )
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    /// Returns true if the array has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `len + 1` offsets into the elements.
    pub fn offsets(&self) -> &Buffer<u64> {
        &self.offsets
    }

    /// The validity bitmap.
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// The flattened elements of every row.
    pub fn elements(&self) -> &Array {
        &self.elements
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::list(self.elements.dtype())
    }
}
