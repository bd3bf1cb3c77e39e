use tether_dtype::{DType, PType};
use tether_error::{TetherResult, tether_bail};

use crate::arrays::PrimitiveArray;

/// Closed intervals stored as parallel left and right bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalArray {
    left: PrimitiveArray,
    right: PrimitiveArray,
}

impl IntervalArray {
    /// Pair bounds of the same kind and length.
    pub fn try_new(left: PrimitiveArray, right: PrimitiveArray) -> TetherResult<Self> {
        if left.ptype() != right.ptype() {
            tether_bail!(MismatchedTypes: left.ptype(), right.ptype());
        }
        if left.len() != right.len() {
            tether_bail!(
                "left bound length {} does not match right bound length {}",
                left.len(),
                right.len()
            );
        }
        Ok(Self { left, right })
    }

    /// Left bounds.
    pub fn left(&self) -> &PrimitiveArray {
        &self.left
    }

    /// Right bounds.
    pub fn right(&self) -> &PrimitiveArray {
        &self.right
    }

    /// Kind of both bounds.
    pub fn ptype(&self) -> PType {
        self.left.ptype()
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Returns true if there are no intervals.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::Interval(self.ptype())
    }
}
