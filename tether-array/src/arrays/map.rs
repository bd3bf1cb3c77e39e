use tether_dtype::{DType, MapDType};
use tether_error::{TetherResult, tether_bail};

use crate::Array;
use crate::arrays::ListArray;

/// Maps stored as lists of `{key, value}` structs.
#[derive(Clone, Debug, PartialEq)]
pub struct MapArray {
    entries: ListArray,
}

impl MapArray {
    /// Wrap a list whose elements are two-field structs of keys and values.
    pub fn try_new(entries: ListArray) -> TetherResult<Self> {
        match entries.elements() {
            Array::Struct(s) if s.fields().len() == 2 => Ok(Self { entries }),
            other => tether_bail!(MismatchedTypes: "list({key, value})", other.dtype()),
        }
    }

    /// The underlying list of entries.
    pub fn entries(&self) -> &ListArray {
        &self.entries
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no maps.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        match self.entries.elements() {
            Array::Struct(s) => DType::Map(MapDType::new(s.fields()[0].dtype(), s.fields()[1].dtype())),
            other => other.dtype(),
        }
    }
}
